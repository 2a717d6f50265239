pub mod payment;

pub use payment::PaymentAgent;
