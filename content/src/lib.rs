//! # Content store
//!
//! Content-addressable storage for OCI image blobs: manifests, configs and
//! layers, keyed by the sha256 digest of their bytes.
//!
//! The [`ContentStore`] trait is the seam the rest of the workspace works
//! against. [`LocalStore`] keeps blobs on disk and is usually wrapped by the
//! metadata index before being handed out.

mod descriptor;
mod digest;
mod error;
mod labels;
mod local;
mod store;

#[doc(inline)]
pub use descriptor::{Descriptor, Platform};
#[doc(inline)]
pub use digest::{Digest, InvalidDigest, SHA256};
#[doc(inline)]
pub use error::{ContentError, ContentErrorBuilder, ContentErrorKind};
#[doc(inline)]
pub use labels::{merge_labels, LabelStore, MemoryLabelStore};
#[doc(inline)]
pub use local::LocalStore;
#[doc(inline)]
pub use store::{ContentStore, Info, Labels, Reader, Writer};
