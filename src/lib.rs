//! Logs into arbitrary web applications by asking a language model where the
//! login form is, instead of hard-coding selectors.

pub mod actions;
pub mod brain;
pub mod cache;
pub mod config;
pub mod dom;
pub mod error;
pub mod hands;
pub mod login;
pub mod resolver;
pub mod stability;
pub mod surface;
pub mod types;

pub use actions::{ActionExecutor, ActionName, ActionSequence, ActionSpec, ExecutionReport};
pub use brain::{ChatQueryService, QueryContext, QueryRequest, QueryService};
pub use cache::PageCache;
pub use error::{LoginError, LoginFailure, LoginState};
pub use hands::{ChromeOptions, ChromeSurface};
pub use login::{CredentialStore, LoginOptions, LoginOrchestrator, QueryMode};
pub use resolver::{ResolveSource, SelectorResolver};
pub use stability::{await_stability, await_stability_within};
pub use surface::{LoadState, SelectorState, Surface};
pub use types::{CredentialRecord, LoginRequest, PageSnapshot, SelectorMap};
