pub mod api;
pub mod commission;
pub mod gateway;
pub mod models;
pub mod orchestrator;
pub mod scheduler;
pub mod service;

pub use commission::{compute_commission, round_currency, Commission};
pub use gateway::{build_invoice_payload, PaymentGateway, PaypalGateway, RemoteInvoice};
pub use orchestrator::{bill_partner, reconcile_payments, run_billing_cycle};
pub use service::{billing_cycle_for, invoice_due_date, ConsolidatedInvoice, InvoiceService};
