//! Builds the pre-document injected provider script.
//!
//! The script text is parameterised by the session wallet address and chain;
//! the browser runtime installs the result with
//! `Page.addScriptToEvaluateOnNewDocument` so it runs before any page script
//! on every document, main frame and subframes alike.

use crate::assets;
use dappcap_config::Chain;

/// Name of the DevTools binding the glue dispatches host calls through.
pub const DISPATCH_BINDING: &str = "__dappcapDispatch";

/// Renders the injected provider script for one session.
pub fn build_init_script(address: &str, chain: &Chain) -> String {
    assets::js::PROVIDER_JS
        .replace("__ADDRESS__", address)
        .replace("__CHAIN_ID_HEX__", &chain.hex_id())
        .replace("__CHAIN_ID_DEC__", &chain.id_string())
}
