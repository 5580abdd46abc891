//! This node's identity within the token ring.
//!
//! Token assignment itself happens elsewhere; the sidecar only consumes the
//! resulting facts to pick a bootstrap path and render the proxy config.

use crate::config::IdentityConfig;

pub trait Identity: Send + Sync {
    fn is_seed(&self) -> bool;

    /// This node took over the token of a terminated instance.
    fn is_replace(&self) -> bool;

    fn is_token_pregenerated(&self) -> bool;

    /// The token was freshly generated for this node (no prior data).
    fn is_new_token(&self) -> bool;

    /// Administratively taken out of service; the sidecar must stay idle.
    fn is_out_of_service(&self) -> bool;

    fn token(&self) -> String;

    /// Seed list in `host:port:rack:dc:token` form.
    fn seeds(&self) -> Vec<String>;

    fn host_ip(&self) -> String;
}

/// Identity fixed at startup from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticIdentity {
    cfg: IdentityConfig,
}

impl StaticIdentity {
    pub fn new(cfg: IdentityConfig) -> Self {
        StaticIdentity { cfg }
    }
}

impl Identity for StaticIdentity {
    fn is_seed(&self) -> bool {
        self.cfg.seed
    }

    fn is_replace(&self) -> bool {
        self.cfg.replace
    }

    fn is_token_pregenerated(&self) -> bool {
        self.cfg.token_pregenerated
    }

    fn is_new_token(&self) -> bool {
        self.cfg.new_token
    }

    fn is_out_of_service(&self) -> bool {
        self.cfg.out_of_service
    }

    fn token(&self) -> String {
        self.cfg.token.clone()
    }

    fn seeds(&self) -> Vec<String> {
        self.cfg.seeds.clone()
    }

    fn host_ip(&self) -> String {
        self.cfg.host_ip.clone()
    }
}
