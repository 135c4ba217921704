//! Template descriptors, parameter validation, the Dataflow catalog and
//! local checkouts of the template repositories

mod catalog;
mod descriptor;
mod repo;
mod user_params;
mod validator;

pub use catalog::TemplateCatalog;
pub use descriptor::{TemplateDescriptor, TemplateKind, TemplateParams};
pub use repo::{clone_branch, find_files, matches_pattern, repo_dir_name, sync_repo};
pub(crate) use repo::walk_files;
pub use user_params::UserParams;
pub use validator::{ValidationResult, validate, validate_json};
