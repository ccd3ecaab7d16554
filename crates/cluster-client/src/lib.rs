//! Cluster access for the OSArtifact controller
//!
//! The reconciler never talks to `kube::Api` directly. It goes through the
//! [`ClusterClient`] trait, which covers exactly the reads and writes the
//! state machine needs, with API errors classified into [`ClusterError`].
//!
//! # Example
//!
//! ```no_run
//! use cluster_client::{ClusterClient, KubeClusterClient};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = KubeClusterClient::try_default().await?;
//!
//! let pods = client
//!     .list_pods("default", "build.kairos.io/artifact=hello-kairos")
//!     .await?;
//! println!("{} builder pods", pods.len());
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - `test-util`: exposes [`MockClusterClient`], an in-memory cluster for unit tests

pub mod client;
pub mod error;
#[path = "trait.rs"]
pub mod cluster_trait;
#[cfg(feature = "test-util")]
pub mod mock;

pub use client::KubeClusterClient;
pub use cluster_trait::ClusterClient;
pub use error::ClusterError;
#[cfg(feature = "test-util")]
pub use mock::MockClusterClient;
