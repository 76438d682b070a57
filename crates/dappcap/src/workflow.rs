//! Interactive terminal workflow: collect wallet, chain, target URL and
//! capture id, then hand off to the live session.

use crate::{assistant, opts::Dappcap, probe, session};
use dappcap_config::{BUILTIN_CHAINS, Chain, paths};
use dappcap_wallets::{Wallet, WalletStore};
use dialoguer::{Confirm, Input, Password, Select};
use eyre::{Context, Result};

pub async fn run(opts: Dappcap) -> Result<()> {
    let config_dir = match &opts.config_dir {
        Some(dir) => dir.clone(),
        None => paths::config_dir()?,
    };
    let logs_dir = paths::logs_dir(&config_dir);

    let report = probe::run(opts.browser.as_deref(), &logs_dir).await?;
    if opts.resetup || !paths::is_setup_complete(&config_dir) {
        println!("Environment checks:");
        println!("  browser:  {} ({})", report.browser.display(), report.browser_version);
        println!(
            "  upstream: {}",
            if report.upstream_reachable { "reachable" } else { "NOT reachable" }
        );
        paths::mark_setup_complete(&config_dir)?;
    }

    let store = WalletStore::new(&config_dir);
    let wallet = choose_wallet(&store)?;
    let chain = choose_chain(opts.chain_id)?;
    let url = choose_url(opts.url)?;
    let capture_id = choose_capture_id(opts.capture_id).await?;

    session::run(session::SessionConfig {
        wallet,
        chain,
        url,
        capture_id,
        browser: report.browser,
        logs_dir,
    })
    .await
}

fn choose_wallet(store: &WalletStore) -> Result<Wallet> {
    loop {
        let wallets = store.load().context("loading wallet store")?;

        let mut items: Vec<String> =
            wallets.iter().map(|w| format!("{} ({})", w.name, w.address_string())).collect();
        items.push("Create a new wallet".into());
        items.push("Import a private key".into());
        items.push("Use a one-off ephemeral wallet".into());
        if !wallets.is_empty() {
            items.push("Delete a wallet".into());
        }

        let picked =
            Select::new().with_prompt("Wallet").items(&items).default(0).interact()?;
        if picked < wallets.len() {
            return Ok(wallets[picked].clone());
        }

        match picked - wallets.len() {
            0 => {
                let name: String =
                    Input::new().with_prompt("Wallet name").interact_text()?;
                let wallet = store.create(name)?;
                println!("Created {}", wallet.address_string());
                return Ok(wallet);
            }
            1 => {
                let name: String =
                    Input::new().with_prompt("Wallet name").interact_text()?;
                let key = Password::new().with_prompt("Private key (0x…)").interact()?;
                match store.import(&name, &key) {
                    Ok(wallet) => return Ok(wallet),
                    Err(err) => {
                        eprintln!("{err}");
                        continue;
                    }
                }
            }
            2 => {
                let wallet = store.create_ephemeral();
                println!("Ephemeral wallet {} (not saved)", wallet.address_string());
                return Ok(wallet);
            }
            _ => {
                let names: Vec<String> =
                    wallets.iter().map(|w| format!("{} ({})", w.name, w.address_string())).collect();
                let victim = Select::new()
                    .with_prompt("Delete which wallet")
                    .items(&names)
                    .interact()?;
                let confirmed = Confirm::new()
                    .with_prompt(format!("Really delete {}?", wallets[victim].name))
                    .default(false)
                    .interact()?;
                if confirmed {
                    store.delete(wallets[victim].address)?;
                }
            }
        }
    }
}

fn choose_chain(preselected: Option<u64>) -> Result<Chain> {
    if let Some(id) = preselected {
        if let Some(chain) = Chain::find_by_id(id) {
            return Ok(chain.clone());
        }
        let name: String = Input::new()
            .with_prompt("Chain name")
            .default(format!("Chain {id}"))
            .interact_text()?;
        let rpc: String = Input::new().with_prompt("RPC endpoint URL").interact_text()?;
        return Ok(Chain::custom(id, name, rpc)?);
    }

    let mut items: Vec<String> = BUILTIN_CHAINS.iter().map(ToString::to_string).collect();
    items.push("Custom chain…".into());
    let picked = Select::new().with_prompt("Chain").items(&items).default(0).interact()?;
    if picked < BUILTIN_CHAINS.len() {
        return Ok(BUILTIN_CHAINS[picked].clone());
    }

    loop {
        let id: u64 = Input::new().with_prompt("Chain id").interact_text()?;
        let name: String = Input::new().with_prompt("Chain name").interact_text()?;
        let rpc: String = Input::new().with_prompt("RPC endpoint URL").interact_text()?;
        match Chain::custom(id, name, rpc) {
            Ok(chain) => return Ok(chain),
            Err(err) => eprintln!("{err}"),
        }
    }
}

fn choose_url(preselected: Option<String>) -> Result<String> {
    if let Some(url) = preselected {
        validate_url(&url)?;
        return Ok(url);
    }
    loop {
        let url: String = Input::new().with_prompt("Application URL").interact_text()?;
        match validate_url(&url) {
            Ok(()) => return Ok(url),
            Err(err) => eprintln!("{err}"),
        }
    }
}

fn validate_url(url: &str) -> Result<()> {
    let parsed = url::Url::parse(url).with_context(|| format!("invalid URL {url:?}"))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        eyre::bail!("URL must use http or https, got {:?}", parsed.scheme());
    }
    Ok(())
}

async fn choose_capture_id(preselected: Option<String>) -> Result<String> {
    if let Some(id) = preselected {
        return Ok(id);
    }
    match assistant::capture_id().await {
        Ok(Some(id)) => {
            println!("Assistant provided capture id {id}");
            return Ok(id);
        }
        Ok(None) => {}
        Err(err) => warn!(target: "workflow", %err, "assistant failed"),
    }
    let id: String = Input::new()
        .with_prompt("Capture id")
        .validate_with(|input: &String| {
            if input.trim().is_empty() { Err("capture id must not be empty") } else { Ok(()) }
        })
        .interact_text()?;
    Ok(id.trim().to_string())
}
