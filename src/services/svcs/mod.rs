//! Service kinds mapping closely onto record types.

pub mod caa;
pub mod cname;
pub mod email;
pub mod mx;
pub mod orphan;
pub mod ptr;
pub mod srv;
pub mod tlsa;
pub mod txt;

use super::Registry;

pub(crate) fn register(registry: &mut Registry) {
    registry.register::<mx::MXs>();
    registry.register::<email::SPF>();
    registry.register::<email::DKIMRecord>();
    registry.register::<email::DMARC>();
    registry.register::<email::MTA_STS>();
    registry.register::<email::TLS_RPT>();
    registry.register::<caa::CAAPolicy>();
    registry.register::<srv::UnknownSRV>();
    registry.register::<tlsa::TLSAs>();
    registry.register::<cname::SpecialCNAME>();
    registry.register::<cname::Cname>();
    registry.register::<ptr::Ptr>();
    registry.register::<txt::Txt>();
    registry.register::<orphan::Orphan>();
}
