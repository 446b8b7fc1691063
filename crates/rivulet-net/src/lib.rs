//! Network transfer layer.
//!
//! [`Net`] is the transfer capability the engine consumes. [`HttpClient`] implements it
//! over reqwest; [`NetExt`] stacks timeout and retry decorators on any implementation.
//! [`retry_with_backoff`] is the generic combinator every retrying component shares.

#![forbid(unsafe_code)]

mod client;
mod error;
mod retry;
mod timeout;
mod traits;
mod types;

pub use crate::{
    client::HttpClient,
    error::{NetError, NetResult},
    retry::{RetryNet, retry_with_backoff, retry_with_budgets},
    timeout::TimeoutNet,
    traits::{ByteStream, Net, NetExt},
    types::{Backoff, NetOptions, RangeSpec, RetryBudget, RetryPolicy},
};
