//! Brandcast Credits
//!
//! The quota core: credit ledger (personal and pooled team balances),
//! daily signup tiering, fixed-window rate limiting, and translation of
//! billing-provider webhook events into ledger mutations.

pub mod error;
pub mod ledger;
pub mod rate_limit;
pub mod signup;
pub mod sync;

pub use error::{CreditsError, CreditsResult};
pub use ledger::{BalanceSummary, CreditLedger};
pub use rate_limit::{LimitScope, RateLimitConfig, RateLimitDecision, RateLimiter};
pub use signup::{observe_signup, SignupObservation};
pub use sync::{BillingEvent, BillingEventKind, BillingSync, SyncOutcome, WebhookVerifier};
