//! Fulfillment step names, used in logs, metrics labels and progress records.

/// Step name: Validate the sales order.
pub const STEP_VALIDATE: &str = "validate";

/// Step name: Check every line against available stock.
pub const STEP_CHECK_AVAILABILITY: &str = "check_availability";

/// Step name: Reserve stock for every line.
pub const STEP_RESERVE_STOCK: &str = "reserve_stock";

/// Step name: Issue the invoice.
pub const STEP_CREATE_INVOICE: &str = "create_invoice";

/// Step name: Clear the reservation deadlines of an invoiced order.
pub const STEP_KEEP_RESERVATIONS: &str = "keep_reservations";

/// Step name: Create one receivable per installment.
pub const STEP_CREATE_RECEIVABLES: &str = "create_receivables";

/// Step name: Open a production order.
pub const STEP_CREATE_PRODUCTION_ORDER: &str = "create_production_order";

/// Step name: Write the final status back to Sales.
pub const STEP_SYNC_STATUS: &str = "sync_status";

/// Step name: Cancel pending receivables during a reversal.
pub const STEP_CANCEL_RECEIVABLES: &str = "cancel_receivables";

/// Step name: Cancel the invoice during a reversal.
pub const STEP_CANCEL_INVOICE: &str = "cancel_invoice";

/// Step name: Release the order's reservations during a reversal.
pub const STEP_RELEASE_STOCK: &str = "release_stock";
