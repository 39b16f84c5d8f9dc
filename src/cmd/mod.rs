//! CLI command implementations.
//!
//! | Module     | Commands handled             |
//! |------------|------------------------------|
//! | `codec`    | `Encode`, `Render`, `Merge`  |
//! | `health`   | `Health`                     |
//! | `edit`     | `Edit`                       |
//! | `serve`    | `Serve`                      |
//! | `config`   | `Config`                     |

pub mod codec;
pub mod config;
pub mod edit;
pub mod health;
pub mod serve;

pub use codec::{cmd_encode, cmd_merge, cmd_render};
pub use config::cmd_config;
pub use edit::cmd_edit;
pub use health::cmd_health;
pub use serve::cmd_serve;
