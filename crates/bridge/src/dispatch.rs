//! Host-side RPC dispatcher.
//!
//! Every wallet call arriving through `__rpcProxy` lands here. Each method is
//! classified into one of three flat classes: answered locally from session
//! config, signed with the session key (optionally arbitrated through the
//! [`ApproverBus`]), or forwarded verbatim to the chain's JSON-RPC endpoint.

use crate::{
    approver::ApproverBus,
    error::DispatchError,
};
use alloy_consensus::{SignableTransaction, TxEnvelope, TxLegacy};
use alloy_dyn_abi::TypedData;
use alloy_eips::eip2718::Encodable2718;
use alloy_primitives::{Address, Bytes, TxKind, U256, hex, utils::format_ether};
use alloy_signer::SignerSync;
use alloy_signer_local::PrivateKeySigner;
use dappcap_config::Chain;
use serde_json::{Value, json};
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

/// Shared signing context: the session key, the chain and the HTTP client
/// used for upstream forwards. Cheap to clone behind an `Arc`; a suspended
/// [`crate::TxRequest`] keeps it alive past the dispatch that created it.
pub(crate) struct SignerContext {
    signer: PrivateKeySigner,
    address: Address,
    chain: Chain,
    http: reqwest::Client,
}

impl SignerContext {
    fn new(signer: PrivateKeySigner, chain: Chain) -> Self {
        let address = signer.address();
        Self { signer, address, chain, http: reqwest::Client::new() }
    }

    /// Relays a call to the chain RPC endpoint as a JSON-RPC 2.0 POST and
    /// returns its `result`. Transport failures, malformed bodies and
    /// non-empty `error` members all collapse into
    /// [`DispatchError::UpstreamRpcFailed`].
    pub(crate) async fn forward(&self, method: &str, params: Value) -> Result<Value, DispatchError> {
        let body = json!({ "jsonrpc": "2.0", "id": 1, "method": method, "params": params });
        trace!(target: "bridge::rpc", method, "forwarding to upstream");

        let response = self
            .http
            .post(self.chain.rpc.as_ref())
            .json(&body)
            .send()
            .await
            .map_err(|e| DispatchError::UpstreamRpcFailed(e.to_string()))?;
        let payload: Value = response
            .json()
            .await
            .map_err(|e| DispatchError::UpstreamRpcFailed(e.to_string()))?;

        if let Some(error) = payload.get("error").filter(|e| !e.is_null()) {
            return Err(DispatchError::UpstreamRpcFailed(error.to_string()));
        }
        match payload.get("result") {
            Some(result) => Ok(result.clone()),
            None => Err(DispatchError::UpstreamRpcFailed(
                "upstream response carries neither result nor error".into(),
            )),
        }
    }

    /// Builds, signs and submits a legacy transaction, returning its hash.
    async fn send_transaction(&self, fields: &TxFields) -> Result<String, DispatchError> {
        let from = self.address.to_checksum(None);
        let nonce =
            quantity_u64(&self.forward("eth_getTransactionCount", json!([from, "pending"])).await?)?;
        let gas_price = quantity_u128(&self.forward("eth_gasPrice", json!([])).await?)?;
        let gas_limit = match fields.gas {
            Some(gas) => gas,
            None => {
                let mut call = serde_json::Map::new();
                call.insert("from".into(), json!(from));
                if let Some(to) = fields.to {
                    call.insert("to".into(), json!(to.to_checksum(None)));
                }
                if !fields.value.is_zero() {
                    call.insert("value".into(), json!(format!("0x{:x}", fields.value)));
                }
                if !fields.data.is_empty() {
                    call.insert("data".into(), json!(fields.data.to_string()));
                }
                quantity_u64(&self.forward("eth_estimateGas", json!([Value::Object(call)])).await?)?
            }
        };

        let tx = TxLegacy {
            chain_id: Some(self.chain.id),
            nonce,
            gas_price,
            gas_limit,
            to: fields.to.map_or(TxKind::Create, TxKind::Call),
            value: fields.value,
            input: fields.data.clone(),
        };
        let signature = self.signer.sign_hash_sync(&tx.signature_hash())?;
        let raw = TxEnvelope::Legacy(tx.into_signed(signature)).encoded_2718();

        let hash =
            self.forward("eth_sendRawTransaction", json!([hex::encode_prefixed(raw)])).await?;
        hash.as_str().map(str::to_string).ok_or_else(|| {
            DispatchError::UpstreamRpcFailed("eth_sendRawTransaction returned a non-string".into())
        })
    }
}

/// A signing operation extracted from an RPC call, executable with or
/// without prior approval.
pub(crate) enum SignAction {
    /// EIP-191 personal message over the raw payload bytes.
    PersonalSign(Bytes),
    /// EIP-712 typed data, already parsed.
    TypedData(Box<TypedData>),
    /// Transaction build-and-send.
    SendTransaction(TxFields),
}

impl SignAction {
    pub(crate) async fn execute(&self, ctx: &SignerContext) -> Result<String, DispatchError> {
        match self {
            Self::PersonalSign(payload) => {
                let signature = ctx.signer.sign_message_sync(payload)?;
                Ok(hex::encode_prefixed(signature.as_bytes()))
            }
            Self::TypedData(typed_data) => {
                let signature = ctx.signer.sign_dynamic_typed_data_sync(typed_data)?;
                Ok(hex::encode_prefixed(signature.as_bytes()))
            }
            Self::SendTransaction(fields) => ctx.send_transaction(fields).await,
        }
    }

    #[cfg(test)]
    pub(crate) fn personal_sign_for_test(payload: &[u8]) -> Self {
        Self::PersonalSign(Bytes::copy_from_slice(payload))
    }
}

/// Transaction fields taken from an `eth_sendTransaction` parameter object.
/// The raw hex strings are kept alongside the decoded values for display.
pub(crate) struct TxFields {
    to: Option<Address>,
    value: U256,
    data: Bytes,
    gas: Option<u64>,
    value_hex: Option<String>,
    data_hex: Option<String>,
    gas_hex: Option<String>,
}

/// How a method is handled; the classification is a flat switch because the
/// set is small and every branch has distinct semantics.
enum MethodClass {
    AnswerLocal(Value),
    Sign { action: SignAction, display: Vec<(String, String)> },
    Forward,
}

/// The host-side dispatcher entered by every `__rpcProxy` call.
pub struct RpcDispatcher {
    ctx: Arc<SignerContext>,
    approver: ApproverBus,
    sequence: AtomicU64,
}

impl RpcDispatcher {
    pub fn new(signer: PrivateKeySigner, chain: Chain, approver: ApproverBus) -> Self {
        Self { ctx: Arc::new(SignerContext::new(signer, chain)), approver, sequence: AtomicU64::new(0) }
    }

    /// The session account address.
    pub fn address(&self) -> Address {
        self.ctx.address
    }

    /// Classifies and executes one RPC call from the page.
    pub async fn dispatch(&self, method: &str, params: Value) -> Result<Value, DispatchError> {
        let params = if params.is_null() { json!([]) } else { params };
        trace!(target: "bridge::rpc", method, "dispatching wallet call");

        match self.classify(method, &params)? {
            MethodClass::AnswerLocal(value) => Ok(value),
            MethodClass::Forward => self.ctx.forward(method, params).await,
            MethodClass::Sign { action, display } => self.sign(method, action, display).await,
        }
    }

    async fn sign(
        &self,
        method: &str,
        action: SignAction,
        display: Vec<(String, String)>,
    ) -> Result<Value, DispatchError> {
        if self.approver.listener_count() == 0 {
            return action.execute(&self.ctx).await.map(Value::String);
        }

        let sequence_id = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let (request, reply) =
            crate::TxRequest::new(sequence_id, method, display, action, self.ctx.clone());
        match self.approver.emit(request) {
            Ok(()) => {
                debug!(target: "bridge::rpc", sequence_id, method, "awaiting approval");
                match reply.await {
                    Ok(Ok(value)) => Ok(Value::String(value)),
                    Ok(Err(reason)) => Err(DispatchError::SigningRejected(reason)),
                    Err(_) => {
                        Err(DispatchError::SigningRejected("approver went away".into()))
                    }
                }
            }
            // The listener detached between the count check and the emit;
            // fall back to signing without arbitration.
            Err(request) => request.sign().await.map(Value::String),
        }
    }

    fn classify(&self, method: &str, params: &Value) -> Result<MethodClass, DispatchError> {
        let class = match method {
            "eth_accounts" | "eth_requestAccounts" => {
                MethodClass::AnswerLocal(json!([self.ctx.address.to_checksum(None)]))
            }
            "eth_chainId" => MethodClass::AnswerLocal(json!(self.ctx.chain.hex_id())),
            "net_version" => MethodClass::AnswerLocal(json!(self.ctx.chain.id_string())),
            "wallet_requestPermissions" | "wallet_getPermissions" => {
                MethodClass::AnswerLocal(json!([{ "parentCapability": "eth_accounts" }]))
            }
            "wallet_switchEthereumChain" | "wallet_addEthereumChain" => {
                MethodClass::AnswerLocal(Value::Null)
            }
            "personal_sign" => {
                let payload_hex = string_param(params, 0, "personal_sign payload")?;
                let payload = hex::decode(&payload_hex).map_err(|e| {
                    DispatchError::InvalidInput(format!("personal_sign payload is not hex: {e}"))
                })?;
                let display = personal_sign_display(&payload, &payload_hex);
                MethodClass::Sign { action: SignAction::PersonalSign(payload.into()), display }
            }
            "eth_signTypedData_v4" => {
                let raw = string_param(params, 1, "typed data payload")?;
                let parsed: Value = serde_json::from_str(&raw).map_err(|e| {
                    DispatchError::InvalidInput(format!("typed data is not valid JSON: {e}"))
                })?;
                let typed_data: TypedData = serde_json::from_value(parsed.clone()).map_err(|e| {
                    DispatchError::InvalidInput(format!("malformed typed data payload: {e}"))
                })?;
                let display = typed_data_display(&parsed);
                MethodClass::Sign { action: SignAction::TypedData(Box::new(typed_data)), display }
            }
            "eth_sendTransaction" => {
                let request = params.get(0).and_then(Value::as_object).ok_or_else(|| {
                    DispatchError::InvalidInput(
                        "eth_sendTransaction expects a transaction object".into(),
                    )
                })?;
                let fields = TxFields::from_request(request)?;
                let display = transaction_display(&fields);
                MethodClass::Sign { action: SignAction::SendTransaction(fields), display }
            }
            _ => MethodClass::Forward,
        };
        Ok(class)
    }
}

impl TxFields {
    fn from_request(request: &serde_json::Map<String, Value>) -> Result<Self, DispatchError> {
        let to = match request.get("to").and_then(Value::as_str) {
            Some(to) => Some(to.parse::<Address>().map_err(|e| {
                DispatchError::InvalidInput(format!("invalid to address {to:?}: {e}"))
            })?),
            None => None,
        };
        let value_hex = request.get("value").and_then(Value::as_str).map(str::to_string);
        let value = match &value_hex {
            Some(raw) => U256::from_str_radix(raw.trim_start_matches("0x"), 16)
                .map_err(|e| DispatchError::InvalidInput(format!("invalid value {raw:?}: {e}")))?,
            None => U256::ZERO,
        };
        let data_hex = request
            .get("data")
            .or_else(|| request.get("input"))
            .and_then(Value::as_str)
            .map(str::to_string);
        let data = match &data_hex {
            Some(raw) => Bytes::from(hex::decode(raw).map_err(|e| {
                DispatchError::InvalidInput(format!("invalid calldata {raw:?}: {e}"))
            })?),
            None => Bytes::new(),
        };
        let gas_hex = request.get("gas").and_then(Value::as_str).map(str::to_string);
        let gas = match &gas_hex {
            Some(raw) => Some(u64::from_str_radix(raw.trim_start_matches("0x"), 16).map_err(
                |e| DispatchError::InvalidInput(format!("invalid gas {raw:?}: {e}")),
            )?),
            None => None,
        };
        Ok(Self { to, value, data, gas, value_hex, data_hex, gas_hex })
    }
}

fn string_param(params: &Value, index: usize, what: &str) -> Result<String, DispatchError> {
    params
        .get(index)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| DispatchError::InvalidInput(format!("missing {what} at position {index}")))
}

fn quantity_u64(value: &Value) -> Result<u64, DispatchError> {
    let raw = value
        .as_str()
        .ok_or_else(|| DispatchError::UpstreamRpcFailed(format!("expected quantity, got {value}")))?;
    u64::from_str_radix(raw.trim_start_matches("0x"), 16)
        .map_err(|e| DispatchError::UpstreamRpcFailed(format!("bad quantity {raw:?}: {e}")))
}

fn quantity_u128(value: &Value) -> Result<u128, DispatchError> {
    let raw = value
        .as_str()
        .ok_or_else(|| DispatchError::UpstreamRpcFailed(format!("expected quantity, got {value}")))?;
    u128::from_str_radix(raw.trim_start_matches("0x"), 16)
        .map_err(|e| DispatchError::UpstreamRpcFailed(format!("bad quantity {raw:?}: {e}")))
}

/// Display fields for a personal-sign request. The payload is shown as text
/// only when every byte is printable ASCII or tab/CR/LF; anything else keeps
/// the original hex.
fn personal_sign_display(payload: &[u8], payload_hex: &str) -> Vec<(String, String)> {
    let printable = !payload.is_empty()
        && payload.iter().all(|&b| matches!(b, 0x20..=0x7e | b'\t' | b'\r' | b'\n'));
    let message = if printable {
        String::from_utf8_lossy(payload).into_owned()
    } else {
        payload_hex.to_string()
    };
    vec![("message".into(), message)]
}

/// Display fields for a typed-data request, taken from the raw JSON so the
/// user sees exactly what the dApp sent.
fn typed_data_display(parsed: &Value) -> Vec<(String, String)> {
    let domain = parsed
        .pointer("/domain/name")
        .and_then(Value::as_str)
        .unwrap_or("Unknown")
        .to_string();
    let primary_type =
        parsed.get("primaryType").and_then(Value::as_str).unwrap_or("Unknown").to_string();
    let message = parsed.get("message").unwrap_or(&Value::Null);
    let data = serde_json::to_string_pretty(message).unwrap_or_else(|_| message.to_string());
    vec![("domain".into(), domain), ("primaryType".into(), primary_type), ("data".into(), data)]
}

/// Display fields for a transaction request.
fn transaction_display(fields: &TxFields) -> Vec<(String, String)> {
    let to = fields
        .to
        .map(|to| to.to_checksum(None))
        .unwrap_or_else(|| "(contract creation)".into());

    let value = match &fields.value_hex {
        None => "0 ETH".to_string(),
        Some(_) if fields.value.is_zero() => "0 ETH".to_string(),
        Some(_) => format_eth(fields.value),
    };

    let data = match &fields.data_hex {
        Some(raw) if raw.len() > 2 => {
            let byte_count = (raw.len() - 2) / 2;
            if raw.len() > 20 {
                format!("{}… ({byte_count} bytes)", &raw[..20])
            } else {
                format!("{raw} ({byte_count} bytes)")
            }
        }
        _ => "(none)".to_string(),
    };

    let gas = fields.gas_hex.clone().unwrap_or_else(|| "auto".into());

    vec![
        ("to".into(), to),
        ("value".into(), value),
        ("data".into(), data),
        ("gas".into(), gas),
    ]
}

fn format_eth(value: U256) -> String {
    let formatted = format_ether(value);
    let trimmed = formatted.trim_end_matches('0').trim_end_matches('.');
    if trimmed.is_empty() { "0 ETH".into() } else { format!("{trimmed} ETH") }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub(crate) const DEV_KEY: &str =
        "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
    pub(crate) const DEV_ADDRESS: &str = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266";

    pub(crate) fn dev_signer() -> PrivateKeySigner {
        DEV_KEY.parse().unwrap()
    }

    pub(crate) fn signer_context() -> Arc<SignerContext> {
        // The RPC endpoint is never reachable; tests that forward bring up
        // their own mock server instead.
        let chain = Chain::custom(31337, "Local", "http://127.0.0.1:1/").unwrap();
        Arc::new(SignerContext::new(dev_signer(), chain))
    }
}

#[cfg(test)]
mod tests {
    use super::{test_support::*, *};
    use axum::{Json, Router, extract::State, routing::post};
    use parking_lot::Mutex;

    fn dispatcher(chain: Chain, approver: ApproverBus) -> RpcDispatcher {
        RpcDispatcher::new(dev_signer(), chain, approver)
    }

    fn local_dispatcher() -> RpcDispatcher {
        let chain = Chain::custom(137, "Polygon", "http://127.0.0.1:1/").unwrap();
        dispatcher(chain, ApproverBus::new())
    }

    /// Mock upstream JSON-RPC endpoint; records every request body.
    async fn mock_upstream(
        respond: fn(&str) -> Value,
    ) -> (Chain, Arc<Mutex<Vec<Value>>>) {
        type Recorded = Arc<Mutex<Vec<Value>>>;

        async fn handler(
            State((recorded, respond)): State<(Recorded, fn(&str) -> Value)>,
            Json(body): Json<Value>,
        ) -> Json<Value> {
            let method = body.get("method").and_then(Value::as_str).unwrap_or_default().to_string();
            recorded.lock().push(body);
            Json(respond(&method))
        }

        let recorded: Recorded = Arc::default();
        let app = Router::new()
            .route("/", post(handler))
            .with_state((recorded.clone(), respond));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let chain = Chain::custom(137, "Mock", format!("http://{addr}/")).unwrap();
        (chain, recorded)
    }

    #[tokio::test]
    async fn identity_probe_needs_no_network() {
        let dispatcher = local_dispatcher();

        let accounts = dispatcher.dispatch("eth_requestAccounts", json!([])).await.unwrap();
        assert_eq!(accounts, json!([DEV_ADDRESS]));
        let accounts = dispatcher.dispatch("eth_accounts", Value::Null).await.unwrap();
        assert_eq!(accounts, json!([DEV_ADDRESS]));

        assert_eq!(dispatcher.dispatch("eth_chainId", json!([])).await.unwrap(), json!("0x89"));
        assert_eq!(dispatcher.dispatch("net_version", json!([])).await.unwrap(), json!("137"));
    }

    #[tokio::test]
    async fn permission_methods_answer_constant() {
        let dispatcher = local_dispatcher();
        for method in ["wallet_requestPermissions", "wallet_getPermissions"] {
            let result = dispatcher.dispatch(method, json!([])).await.unwrap();
            assert_eq!(result, json!([{ "parentCapability": "eth_accounts" }]));
        }
        for method in ["wallet_switchEthereumChain", "wallet_addEthereumChain"] {
            let result = dispatcher.dispatch(method, json!([{ "chainId": "0x1" }])).await.unwrap();
            assert_eq!(result, Value::Null);
        }
    }

    #[tokio::test]
    async fn local_answers_never_touch_the_approver() {
        let approver = ApproverBus::new();
        let mut requests = approver.attach();
        let chain = Chain::custom(137, "Polygon", "http://127.0.0.1:1/").unwrap();
        let dispatcher = dispatcher(chain, approver);

        for method in [
            "eth_accounts",
            "eth_requestAccounts",
            "eth_chainId",
            "net_version",
            "wallet_requestPermissions",
            "wallet_getPermissions",
            "wallet_switchEthereumChain",
            "wallet_addEthereumChain",
        ] {
            dispatcher.dispatch(method, json!([])).await.unwrap();
        }
        assert!(requests.try_recv().is_err(), "local answer emitted a TxRequest");
    }

    #[tokio::test]
    async fn personal_sign_without_approver_signs_immediately() {
        let dispatcher = local_dispatcher();

        // "hello"
        let result =
            dispatcher.dispatch("personal_sign", json!(["0x68656c6c6f", DEV_ADDRESS])).await.unwrap();
        let signature = result.as_str().unwrap();
        assert!(signature.starts_with("0x"));
        assert_eq!(signature.len(), 132, "expected 65-byte signature, got {signature}");

        // Deterministic ECDSA: same payload, same signature.
        let again =
            dispatcher.dispatch("personal_sign", json!(["0x68656c6c6f", DEV_ADDRESS])).await.unwrap();
        assert_eq!(result, again);
    }

    #[tokio::test]
    async fn personal_sign_with_approver_is_arbitrated() {
        let approver = ApproverBus::new();
        let mut requests = approver.attach();
        let chain = Chain::custom(137, "Polygon", "http://127.0.0.1:1/").unwrap();
        let dispatcher = Arc::new(dispatcher(chain, approver));

        let task = {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move {
                dispatcher.dispatch("personal_sign", json!(["0x68656c6c6f", DEV_ADDRESS])).await
            })
        };

        let request = requests.recv().await.unwrap();
        assert_eq!(request.sequence_id, 1);
        assert_eq!(request.method, "personal_sign");
        assert_eq!(request.display, vec![("message".to_string(), "hello".to_string())]);
        request.resolve("0xSIG");

        assert_eq!(task.await.unwrap().unwrap(), json!("0xSIG"));
    }

    #[tokio::test]
    async fn rejection_reaches_the_page() {
        let approver = ApproverBus::new();
        let mut requests = approver.attach();
        let chain = Chain::custom(137, "Polygon", "http://127.0.0.1:1/").unwrap();
        let dispatcher = Arc::new(dispatcher(chain, approver));

        let task = {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move {
                dispatcher.dispatch("personal_sign", json!(["0x68656c6c6f"])).await
            })
        };

        let request = requests.recv().await.unwrap();
        request.reject("User rejected the request");

        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, DispatchError::SigningRejected(_)));
        assert!(err.to_string().contains("User rejected the request"));
    }

    #[tokio::test]
    async fn approver_can_produce_the_real_signature() {
        let approver = ApproverBus::new();
        let mut requests = approver.attach();
        let chain = Chain::custom(137, "Polygon", "http://127.0.0.1:1/").unwrap();
        let dispatcher = Arc::new(dispatcher(chain, approver));

        let task = {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move {
                dispatcher.dispatch("personal_sign", json!(["0x68656c6c6f"])).await
            })
        };

        let request = requests.recv().await.unwrap();
        let signature = request.sign().await.unwrap();
        request.resolve(signature.clone());

        assert_eq!(task.await.unwrap().unwrap(), json!(signature));
        assert_eq!(signature.len(), 132);
    }

    #[tokio::test]
    async fn sequence_ids_are_monotonic() {
        let approver = ApproverBus::new();
        let mut requests = approver.attach();
        let chain = Chain::custom(137, "Polygon", "http://127.0.0.1:1/").unwrap();
        let dispatcher = Arc::new(dispatcher(chain, approver));

        for _ in 0..3 {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move {
                let _ = dispatcher.dispatch("personal_sign", json!(["0x01"])).await;
            });
        }
        let mut seen = Vec::new();
        for _ in 0..3 {
            let request = requests.recv().await.unwrap();
            seen.push(request.sequence_id);
            request.reject("done");
        }
        seen.sort_unstable();
        assert_eq!(seen, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn typed_data_signing_and_display() {
        let typed = json!({
            "types": {
                "EIP712Domain": [
                    { "name": "name", "type": "string" },
                    { "name": "chainId", "type": "uint256" }
                ],
                "Greeting": [{ "name": "contents", "type": "string" }]
            },
            "domain": { "name": "Greeter", "chainId": 137 },
            "primaryType": "Greeting",
            "message": { "contents": "hi there" }
        })
        .to_string();

        let approver = ApproverBus::new();
        let mut requests = approver.attach();
        let chain = Chain::custom(137, "Polygon", "http://127.0.0.1:1/").unwrap();
        let dispatcher = Arc::new(dispatcher(chain, approver));

        let task = {
            let dispatcher = dispatcher.clone();
            let params = json!([DEV_ADDRESS, typed]);
            tokio::spawn(async move { dispatcher.dispatch("eth_signTypedData_v4", params).await })
        };

        let request = requests.recv().await.unwrap();
        let display: std::collections::HashMap<_, _> = request.display.iter().cloned().collect();
        assert_eq!(display["domain"], "Greeter");
        assert_eq!(display["primaryType"], "Greeting");
        assert!(display["data"].contains("hi there"));

        let signature = request.sign().await.unwrap();
        assert_eq!(signature.len(), 132);
        request.resolve(signature);
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn unknown_methods_forward_exactly_once() {
        let (chain, recorded) =
            mock_upstream(|_| json!({ "jsonrpc": "2.0", "id": 1, "result": "0x10" })).await;
        let dispatcher = dispatcher(chain, ApproverBus::new());

        let result = dispatcher.dispatch("eth_blockNumber", Value::Null).await.unwrap();
        assert_eq!(result, json!("0x10"));

        let bodies = recorded.lock().clone();
        assert_eq!(bodies.len(), 1, "expected exactly one upstream POST");
        assert_eq!(bodies[0]["jsonrpc"], "2.0");
        assert_eq!(bodies[0]["id"], 1);
        assert_eq!(bodies[0]["method"], "eth_blockNumber");
        assert_eq!(bodies[0]["params"], json!([]));
    }

    #[tokio::test]
    async fn upstream_error_propagates() {
        let (chain, _recorded) = mock_upstream(|_| {
            json!({ "jsonrpc": "2.0", "id": 1, "error": { "code": -32000, "message": "boom" } })
        })
        .await;
        let dispatcher = dispatcher(chain, ApproverBus::new());

        let err = dispatcher.dispatch("eth_blockNumber", json!([])).await.unwrap_err();
        assert!(matches!(err, DispatchError::UpstreamRpcFailed(_)));
        assert!(err.to_string().contains("boom"));
    }

    #[tokio::test]
    async fn send_transaction_builds_and_submits() {
        let (chain, recorded) = mock_upstream(|method| match method {
            "eth_getTransactionCount" => json!({ "jsonrpc": "2.0", "id": 1, "result": "0x2" }),
            "eth_gasPrice" => json!({ "jsonrpc": "2.0", "id": 1, "result": "0x3b9aca00" }),
            "eth_estimateGas" => json!({ "jsonrpc": "2.0", "id": 1, "result": "0x5208" }),
            "eth_sendRawTransaction" => json!({
                "jsonrpc": "2.0", "id": 1,
                "result": "0x88df016429689c079f3b2f6ad39fa052532c56795b733da78a91ebe6a713944b"
            }),
            other => json!({ "jsonrpc": "2.0", "id": 1, "error": { "message": format!("unexpected {other}") } }),
        })
        .await;
        let dispatcher = dispatcher(chain, ApproverBus::new());

        let result = dispatcher
            .dispatch(
                "eth_sendTransaction",
                json!([{
                    "from": DEV_ADDRESS,
                    "to": "0x70997970C51812dc3A010C7d01b50e0d17dc79C8",
                    "value": "0xde0b6b3a7640000"
                }]),
            )
            .await
            .unwrap();
        assert_eq!(
            result,
            json!("0x88df016429689c079f3b2f6ad39fa052532c56795b733da78a91ebe6a713944b")
        );

        let methods: Vec<String> = recorded
            .lock()
            .iter()
            .map(|b| b["method"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(
            methods,
            vec!["eth_getTransactionCount", "eth_gasPrice", "eth_estimateGas", "eth_sendRawTransaction"]
        );

        let raw_tx = recorded.lock().last().unwrap()["params"][0].as_str().unwrap().to_string();
        assert!(raw_tx.starts_with("0x"), "raw transaction should be hex, got {raw_tx}");
    }

    #[test]
    fn personal_sign_display_printable_and_binary() {
        let display = personal_sign_display(b"hello\nworld", "0x...");
        assert_eq!(display[0].1, "hello\nworld");

        let display = personal_sign_display(&[0x00, 0x01], "0x0001");
        assert_eq!(display[0].1, "0x0001");

        let display = personal_sign_display(&[], "0x");
        assert_eq!(display[0].1, "0x");
    }

    #[test]
    fn transaction_display_formats() {
        let fields = TxFields {
            to: None,
            value: U256::from(1_500_000_000_000_000_000u128),
            data: Bytes::new(),
            gas: None,
            value_hex: Some("0x14d1120d7b160000".into()),
            data_hex: None,
            gas_hex: None,
        };
        let display: std::collections::HashMap<_, _> =
            transaction_display(&fields).into_iter().collect();
        assert_eq!(display["to"], "(contract creation)");
        assert_eq!(display["value"], "1.5 ETH");
        assert_eq!(display["data"], "(none)");
        assert_eq!(display["gas"], "auto");

        let calldata = format!("0x{}", "ab".repeat(40));
        let fields = TxFields {
            to: Some(DEV_ADDRESS.parse().unwrap()),
            value: U256::ZERO,
            data: Bytes::from(vec![0xab; 40]),
            gas: Some(21000),
            value_hex: None,
            data_hex: Some(calldata.clone()),
            gas_hex: Some("0x5208".into()),
        };
        let display: std::collections::HashMap<_, _> =
            transaction_display(&fields).into_iter().collect();
        assert_eq!(display["to"], DEV_ADDRESS);
        assert_eq!(display["value"], "0 ETH");
        assert_eq!(display["data"], format!("{}… (40 bytes)", &calldata[..20]));
        assert_eq!(display["gas"], "0x5208");
    }

    #[test]
    fn eth_display_trims_trailing_zeros() {
        assert_eq!(format_eth(U256::ZERO), "0 ETH");
        assert_eq!(format_eth(U256::from(10).pow(U256::from(18))), "1 ETH");
        assert_eq!(format_eth(U256::from(1_500_000_000_000_000_000u128)), "1.5 ETH");
    }
}
