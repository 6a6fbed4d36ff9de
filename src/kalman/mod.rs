pub mod ud;

pub use ud::{UdFilter, UpdateMode};
