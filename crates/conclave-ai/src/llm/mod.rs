//! LLM client implementations bound through `conclave_traits::LlmClient`
//! (spec §1 "the LLM provider SDKs ... deliberately out of scope"; this
//! module keeps only the minimal seam-demonstrating clients plus the
//! retry decorator and test mock).

pub mod factory;
pub mod http;
pub mod mock;
pub mod retry;

pub use factory::{build_client, ApiKeyResolver, EnvApiKeyResolver};
pub use mock::{LlmErrorKind, MockLlmClient, MockStep};
pub use retry::{LlmRetryConfig, RetryingLlmClient};
