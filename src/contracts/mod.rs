pub mod irsb;

pub use irsb::Irsb;
