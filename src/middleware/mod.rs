pub mod rate_limit;
pub mod x402;

pub use rate_limit::apply_rate_limit;
pub use x402::{payment_gate_layer, PaymentGate};
