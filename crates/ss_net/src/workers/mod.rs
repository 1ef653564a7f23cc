//! The four worker loops described in §4.2, §4.4, §4.5, §4.6.

pub mod recv;
pub mod reliable;
pub mod send;
pub mod sized_send;
