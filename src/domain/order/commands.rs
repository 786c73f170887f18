use super::value_objects::PaymentMethod;

// ============================================================================
// Order Commands - Mutations requested against an existing order
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum OrderCommand {
    /// Record a successful charge
    Pay {
        transaction_id: String,
        payment_method: PaymentMethod,
    },
    Cancel,
    /// Downstream assembly finished for this order
    CompleteAssembly { build_time_seconds: u64 },
}
