//! Deployment creation and cross-partition distribution.
//!
//! A deployment is created on the deployment partition and then propagated
//! to every other partition with three messages:
//!
//! 1. `DEPLOYMENT.CREATE` (owner) validates the resources, writes `CREATED`
//!    and one `DISTRIBUTING` per follower, then sends `DISTRIBUTE` to each
//! 2. `DEPLOYMENT.DISTRIBUTE` (follower) applies the deployment once and
//!    always acknowledges with `COMPLETE`
//! 3. `DEPLOYMENT_DISTRIBUTION.COMPLETE` (owner) removes the partition from
//!    the pending set; the last one writes `FULLY_DISTRIBUTED`
//!
//! The [`DeploymentRedistributor`] re-sends `DISTRIBUTE` for every pending
//! partition until it is acknowledged.

mod complete;
mod create;
mod distribute;
mod redistributor;
mod resources;

pub use complete::CompleteDeploymentDistributionProcessor;
pub use create::DeploymentCreateProcessor;
pub use distribute::DeploymentDistributeProcessor;
pub use redistributor::DeploymentRedistributor;
