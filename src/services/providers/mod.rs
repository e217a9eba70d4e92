//! Service kinds tied to a hosted offering.

pub mod google;

use super::Registry;

pub(crate) fn register(registry: &mut Registry) {
    registry.register::<google::GSuite>();
}
