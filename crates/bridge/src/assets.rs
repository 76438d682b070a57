/// Embedded page-side scripts.
pub mod js {
    /// Pre-document script: host-call glue + wallet provider + EIP-6963
    /// announcement. Carries the `__ADDRESS__`, `__CHAIN_ID_HEX__` and
    /// `__CHAIN_ID_DEC__` placeholders filled in by
    /// [`crate::provider::build_init_script`].
    pub const PROVIDER_JS: &str = include_str!("assets/provider.js");

    /// Idempotent fetch interposer rerouting capture submissions through the
    /// host. Installed at toolbar-injection time.
    pub const INTERCEPTOR_JS: &str = include_str!("assets/interceptor.js");
}
