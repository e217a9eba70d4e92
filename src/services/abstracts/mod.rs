//! Service kinds modelling intent rather than a single record type.

mod delegation;
mod matrix;
mod openpgp;
mod origin;
mod server;
mod verification;

pub use delegation::{Delegation, Ds};
pub use matrix::MatrixIM;
pub use openpgp::OpenPGP;
pub use origin::{NSOnlyOrigin, Origin, Soa};
pub use server::{Server, Sshfp};
pub use verification::{ACMEChallenge, GithubOrgVerif, GoogleVerif, KeybaseVerif};

use super::Registry;

pub(crate) fn register(registry: &mut Registry) {
    registry.register::<Origin>();
    registry.register::<NSOnlyOrigin>();
    registry.register::<Delegation>();
    registry.register::<MatrixIM>();
    registry.register::<ACMEChallenge>();
    registry.register::<GithubOrgVerif>();
    registry.register::<GoogleVerif>();
    registry.register::<KeybaseVerif>();
    registry.register::<OpenPGP>();
    registry.register::<Server>();
}
