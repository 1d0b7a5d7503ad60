//! Image-name security policy
//!
//! Images whose name contains `postgres` (any case) run as the postgres user
//! baked into the official image (UID/GID 999). This is a substring match on
//! the image reference, not a declared field: any image with `postgres` in its
//! name is affected.

use k8s_openapi::api::core::v1::{PodSecurityContext, SecurityContext};

/// UID and GID of the postgres user in the official image
pub const POSTGRES_UID: i64 = 999;

const POSTGRES_MARKER: &str = "postgres";

/// Container and pod security contexts selected for an image
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SecurityProfile {
    /// Container-level security context
    pub container: Option<SecurityContext>,
    /// Pod-level security context
    pub pod: Option<PodSecurityContext>,
}

/// True when the postgres profile applies to `image`
pub fn is_postgres_image(image: &str) -> bool {
    image.to_lowercase().contains(POSTGRES_MARKER)
}

/// Select the security profile for an image.
///
/// Postgres images get a fixed non-root profile on both the container and the
/// pod; every other image gets none.
pub fn security_profile_for_image(image: &str) -> SecurityProfile {
    if !is_postgres_image(image) {
        return SecurityProfile::default();
    }

    SecurityProfile {
        container: Some(SecurityContext {
            run_as_user: Some(POSTGRES_UID),
            run_as_group: Some(POSTGRES_UID),
            allow_privilege_escalation: Some(false),
            ..Default::default()
        }),
        pod: Some(PodSecurityContext {
            run_as_user: Some(POSTGRES_UID),
            run_as_group: Some(POSTGRES_UID),
            fs_group: Some(POSTGRES_UID),
            run_as_non_root: Some(true),
            ..Default::default()
        }),
    }
}
