//! Asset pipeline for quire documentation sites.
//!
//! Compiles stylesheets, renders markdown content through templates, copies
//! vendor packages, and publishes the result to a git branch.

pub mod content;
pub mod deploy;
pub mod frontmatter;
pub mod fsutil;
pub mod styles;
pub mod templates;
pub mod vendor;

pub use content::{ContentBuilder, ContentConfig, ContentError, ContentReport};
pub use deploy::{DeployConfig, DeployError, DeployReport, GitIdentity, GitPublisher};
pub use frontmatter::{extract_frontmatter, Frontmatter, FrontmatterError};
pub use fsutil::{copy_dir, empty_dir, remove_path};
pub use styles::{Preprocessor, StyleCompiler, StyleConfig, StyleError, StyleOutput};
pub use vendor::{PackageResolver, VendorCopier, VendorCopy, VendorError, VendorPackage};
