//! Soroban RPC client signing with the backend key.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use ed25519_dalek::{Signer, SigningKey};
use rand::RngCore;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use stellar_strkey::{ed25519::PrivateKey as StrkeyPrivateKey, ed25519::PublicKey as StrkeyPublicKey, Contract};
use stellar_xdr::curr::{
    ContractExecutable, ContractIdPreimage, ContractIdPreimageFromAddress, CreateContractArgs,
    DecoratedSignature, Hash, HashIdPreimage, HashIdPreimageContractId, HostFunction,
    InvokeContractArgs, InvokeHostFunctionOp, LedgerEntryData, LedgerKey, LedgerKeyAccount,
    Limits, Memo, MuxedAccount, Operation, OperationBody, Preconditions, ReadXdr, ScSymbol,
    ScVal, SequenceNumber,
    Signature, SignatureHint, SorobanAuthorizationEntry, SorobanTransactionData, StringM,
    TimeBounds, TimePoint, Transaction, TransactionEnvelope, TransactionExt, TransactionMeta,
    TransactionV1Envelope, Uint256, VecM, WriteXdr,
};

use crate::args::{account_id, account_key_bytes, parse_address, Invocation, ScArg};
use crate::error::{LedgerError, Result};
use crate::ledger::{Ledger, PreparedDeploy, PreparedTx, SubmittedTx};
use crate::native::{contract_strkey, sc_val_to_json};
use crate::rpc::{
    call, call_no_params, GetLatestLedgerResult, GetLedgerEntriesParams, GetLedgerEntriesResult,
    GetTransactionParams, GetTransactionResult, HttpTransport, RpcTransport,
    SendTransactionResult, SimulateTransactionResult, TransactionParams,
};

/// Inclusion fee per operation, in stroops.
const BASE_FEE: u32 = 100;
/// Upper time bound applied to every built transaction.
const TX_TIMEOUT_SECS: u64 = 60;
/// ENVELOPE_TYPE_TX
const ENVELOPE_TYPE_TX: u32 = 2;

#[derive(Debug, Clone)]
pub struct SorobanConfig {
    pub rpc_url: String,
    pub network_passphrase: String,
    /// Stellar secret seed (`S...`) of the backend signer.
    pub signer_secret: String,
    pub poll_attempts: u32,
    pub poll_interval: Duration,
}

impl SorobanConfig {
    pub fn new(
        rpc_url: impl Into<String>,
        network_passphrase: impl Into<String>,
        signer_secret: impl Into<String>,
    ) -> Self {
        Self {
            rpc_url: rpc_url.into(),
            network_passphrase: network_passphrase.into(),
            signer_secret: signer_secret.into(),
            poll_attempts: 30,
            poll_interval: Duration::from_secs(1),
        }
    }
}

pub struct SorobanClient {
    rpc: Arc<dyn RpcTransport>,
    signing_key: SigningKey,
    public_key: String,
    network_passphrase: String,
    network_id: [u8; 32],
    poll_attempts: u32,
    poll_interval: Duration,
}

impl fmt::Debug for SorobanClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SorobanClient")
            .field("rpc_url", &self.rpc.url())
            .field("public_key", &self.public_key)
            .field("network_passphrase", &self.network_passphrase)
            .finish()
    }
}

impl SorobanClient {
    pub fn new(config: SorobanConfig) -> Result<Self> {
        let transport = Arc::new(HttpTransport::new(config.rpc_url.clone()));
        Self::with_transport(config, transport)
    }

    pub fn with_transport(config: SorobanConfig, rpc: Arc<dyn RpcTransport>) -> Result<Self> {
        let secret = config.signer_secret.trim();
        if secret.is_empty() {
            return Err(LedgerError::MissingSigner);
        }
        let private_key = StrkeyPrivateKey::from_string(secret)
            .map_err(|e| LedgerError::InvalidSigner(e.to_string()))?;
        let signing_key = SigningKey::from_bytes(&private_key.0);
        let public_key = StrkeyPublicKey(signing_key.verifying_key().to_bytes()).to_string();

        tracing::info!(
            rpc_url = %config.rpc_url,
            public_key = %public_key,
            "Initialized Soroban client"
        );

        Ok(Self {
            rpc,
            signing_key,
            public_key,
            network_id: network_id(&config.network_passphrase),
            network_passphrase: config.network_passphrase,
            poll_attempts: config.poll_attempts.max(1),
            poll_interval: config.poll_interval,
        })
    }

    async fn account_sequence(&self, account: &str) -> Result<i64> {
        let key = LedgerKey::Account(LedgerKeyAccount {
            account_id: account_id(account_key_bytes(account)?),
        });
        let params = GetLedgerEntriesParams {
            keys: vec![BASE64.encode(key.to_xdr(Limits::none())?)],
        };
        let result: GetLedgerEntriesResult =
            call(self.rpc.as_ref(), "getLedgerEntries", params).await?;

        let entry = result
            .entries
            .unwrap_or_default()
            .into_iter()
            .next()
            .ok_or_else(|| LedgerError::AccountNotFound(account.to_string()))?;

        match LedgerEntryData::from_xdr(BASE64.decode(&entry.xdr)?, Limits::none())? {
            LedgerEntryData::Account(acc) => Ok(acc.seq_num.0),
            _ => Err(LedgerError::InvalidXdr(
                "getLedgerEntries returned a non-account entry".to_string(),
            )),
        }
    }

    async fn build_transaction(
        &self,
        source: &str,
        host_functions: Vec<HostFunction>,
    ) -> Result<Transaction> {
        let source_key = account_key_bytes(source)?;
        let sequence = self
            .account_sequence(source)
            .await?
            .checked_add(1)
            .ok_or_else(|| LedgerError::InvalidXdr("Sequence number overflow".to_string()))?;

        let op_count = host_functions.len() as u32;
        let operations: Vec<Operation> = host_functions
            .into_iter()
            .map(|host_function| Operation {
                source_account: None,
                body: OperationBody::InvokeHostFunction(InvokeHostFunctionOp {
                    host_function,
                    auth: VecM::default(),
                }),
            })
            .collect();

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();

        Ok(Transaction {
            source_account: MuxedAccount::Ed25519(Uint256(source_key)),
            fee: BASE_FEE.saturating_mul(op_count),
            seq_num: SequenceNumber(sequence),
            cond: Preconditions::Time(TimeBounds {
                min_time: TimePoint(0),
                max_time: TimePoint(now + TX_TIMEOUT_SECS),
            }),
            memo: Memo::None,
            operations: operations.try_into()?,
            ext: TransactionExt::V0,
        })
    }

    async fn simulate(&self, tx: &Transaction) -> Result<SimulateTransactionResult> {
        let envelope = encode_envelope(&unsigned_envelope(tx.clone()))?;
        let sim: SimulateTransactionResult = call(
            self.rpc.as_ref(),
            "simulateTransaction",
            TransactionParams { transaction: envelope },
        )
        .await?;

        if let Some(error) = sim.error {
            tracing::debug!(error = %error, "Simulation returned error");
            return Err(LedgerError::Simulation(error));
        }
        Ok(sim)
    }

    /// Build and simulate, then attach resources, auth and fees.
    async fn prepare(&self, source: &str, host_functions: Vec<HostFunction>) -> Result<Transaction> {
        let tx = self.build_transaction(source, host_functions).await?;
        let sim = self.simulate(&tx).await?;
        assemble(tx, &sim)
    }

    fn sign(&self, tx: Transaction) -> Result<TransactionEnvelope> {
        let hash = transaction_hash(&self.network_id, &tx)?;
        let signature = self.signing_key.sign(&hash).to_bytes();
        let public = self.signing_key.verifying_key().to_bytes();

        let decorated = DecoratedSignature {
            hint: SignatureHint([public[28], public[29], public[30], public[31]]),
            signature: Signature(signature.to_vec().try_into()?),
        };

        Ok(TransactionEnvelope::Tx(TransactionV1Envelope {
            tx,
            signatures: vec![decorated].try_into()?,
        }))
    }

    /// Submit and poll until the transaction is final. `expected_contract` is
    /// used when the result meta carries no contract address.
    async fn send_and_wait(
        &self,
        envelope_xdr: String,
        expected_contract: Option<String>,
    ) -> Result<SubmittedTx> {
        let send: SendTransactionResult = call(
            self.rpc.as_ref(),
            "sendTransaction",
            TransactionParams {
                transaction: envelope_xdr,
            },
        )
        .await?;

        if send.status == "ERROR" || send.status == "TRY_AGAIN_LATER" {
            return Err(LedgerError::Submission {
                status: send.status,
                detail: send
                    .error_result_xdr
                    .unwrap_or_else(|| "no error result".to_string()),
            });
        }

        tracing::info!(tx_hash = %send.hash, status = %send.status, "Transaction submitted");

        let confirmed = self.wait_for_transaction(&send.hash).await?;
        let returned = confirmed
            .result_meta_xdr
            .as_deref()
            .and_then(|meta| match return_value_from_meta(meta) {
                Ok(value) => value,
                Err(e) => {
                    tracing::warn!(tx_hash = %send.hash, error = %e, "Unable to decode transaction meta");
                    None
                }
            })
            .as_ref()
            .and_then(contract_strkey);

        let contract_id = match (returned, expected_contract) {
            (Some(id), _) => Some(id),
            (None, Some(expected)) => {
                tracing::debug!(tx_hash = %send.hash, contract_id = %expected, "Using contract ID derived from envelope");
                Some(expected)
            }
            (None, None) => None,
        };

        Ok(SubmittedTx {
            tx_hash: send.hash,
            contract_id,
        })
    }

    async fn wait_for_transaction(&self, hash: &str) -> Result<GetTransactionResult> {
        for attempt in 1..=self.poll_attempts {
            let result: GetTransactionResult = call(
                self.rpc.as_ref(),
                "getTransaction",
                GetTransactionParams {
                    hash: hash.to_string(),
                },
            )
            .await?;

            match result.status.as_str() {
                "SUCCESS" => {
                    tracing::info!(tx_hash = %hash, ledger = ?result.ledger, "Transaction confirmed");
                    return Ok(result);
                }
                "FAILED" => {
                    return Err(LedgerError::TransactionFailed {
                        hash: hash.to_string(),
                        detail: result.result_xdr.unwrap_or_else(|| "unknown".to_string()),
                    });
                }
                status => {
                    tracing::debug!(tx_hash = %hash, status, attempt, "Transaction not yet confirmed");
                }
            }

            if attempt < self.poll_attempts {
                tokio::time::sleep(self.poll_interval).await;
            }
        }

        Err(LedgerError::Timeout {
            hash: hash.to_string(),
            attempts: self.poll_attempts,
        })
    }
}

#[async_trait]
impl Ledger for SorobanClient {
    fn backend_public_key(&self) -> &str {
        &self.public_key
    }

    fn network_passphrase(&self) -> &str {
        &self.network_passphrase
    }

    async fn invoke_view(
        &self,
        contract_id: &str,
        method: &str,
        args: Vec<ScArg>,
    ) -> Result<Value> {
        let call = invoke_contract(&Invocation::new(contract_id, method, args))?;
        let tx = self.build_transaction(&self.public_key, vec![call]).await?;
        let sim = self.simulate(&tx).await?;

        let Some(xdr) = sim.results.first().and_then(|r| r.xdr.as_deref()) else {
            return Ok(Value::Null);
        };
        let value = ScVal::from_xdr(BASE64.decode(xdr)?, Limits::none())?;
        Ok(sc_val_to_json(&value))
    }

    async fn invoke_signed(
        &self,
        contract_id: &str,
        method: &str,
        args: Vec<ScArg>,
    ) -> Result<SubmittedTx> {
        tracing::debug!(contract_id, method, "Invoking contract as backend signer");
        let call = invoke_contract(&Invocation::new(contract_id, method, args))?;
        let tx = self.prepare(&self.public_key, vec![call]).await?;
        let envelope = self.sign(tx)?;
        self.send_and_wait(encode_envelope(&envelope)?, None).await
    }

    async fn prepare_unsigned_invoke(
        &self,
        source: &str,
        contract_id: &str,
        method: &str,
        args: Vec<ScArg>,
    ) -> Result<PreparedTx> {
        self.prepare_unsigned_batch_invoke(source, vec![Invocation::new(contract_id, method, args)])
            .await
    }

    async fn prepare_unsigned_batch_invoke(
        &self,
        source: &str,
        invocations: Vec<Invocation>,
    ) -> Result<PreparedTx> {
        if invocations.is_empty() {
            return Err(LedgerError::EmptyBatch);
        }
        let calls = invocations
            .iter()
            .map(invoke_contract)
            .collect::<Result<Vec<_>>>()?;
        let tx = self.prepare(source, calls).await?;
        Ok(PreparedTx {
            unsigned_xdr: encode_envelope(&unsigned_envelope(tx))?,
            network_passphrase: self.network_passphrase.clone(),
        })
    }

    async fn prepare_deploy_contract(
        &self,
        owner: &str,
        wasm_hash_hex: &str,
    ) -> Result<PreparedDeploy> {
        let wasm_hash: [u8; 32] = hex::decode(wasm_hash_hex.trim())
            .map_err(|e| LedgerError::InvalidArgument(format!("wasm hash: {}", e)))?
            .try_into()
            .map_err(|_| LedgerError::InvalidArgument("wasm hash must be 32 bytes".to_string()))?;

        let mut salt = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut salt);

        let create = HostFunction::CreateContract(CreateContractArgs {
            contract_id_preimage: ContractIdPreimage::Address(ContractIdPreimageFromAddress {
                address: parse_address(owner)?,
                salt: Uint256(salt),
            }),
            executable: ContractExecutable::Wasm(Hash(wasm_hash)),
        });

        let tx = self.prepare(owner, vec![create]).await?;
        Ok(PreparedDeploy {
            unsigned_xdr: encode_envelope(&unsigned_envelope(tx))?,
            salt_hex: hex::encode(salt),
        })
    }

    async fn submit_signed(&self, signed_xdr: &str) -> Result<SubmittedTx> {
        let signed_xdr = signed_xdr.trim();
        let envelope = TransactionEnvelope::from_xdr(BASE64.decode(signed_xdr)?, Limits::none())?;
        let expected_contract = deployed_contract_id(&self.network_id, &envelope)?;
        self.send_and_wait(signed_xdr.to_string(), expected_contract)
            .await
    }

    async fn latest_ledger_sequence(&self) -> Result<u32> {
        let latest: GetLatestLedgerResult =
            call_no_params(self.rpc.as_ref(), "getLatestLedger").await?;
        Ok(latest.sequence)
    }
}

/// SHA-256 of the network passphrase.
pub fn network_id(passphrase: &str) -> [u8; 32] {
    Sha256::digest(passphrase.as_bytes()).into()
}

/// Hash signed by transaction signers: `sha256(network_id || ENVELOPE_TYPE_TX || tx)`.
pub fn transaction_hash(network_id: &[u8; 32], tx: &Transaction) -> Result<[u8; 32]> {
    let mut preimage = Vec::with_capacity(128);
    preimage.extend_from_slice(network_id);
    preimage.extend_from_slice(&ENVELOPE_TYPE_TX.to_be_bytes());
    preimage.extend_from_slice(&tx.to_xdr(Limits::none())?);
    Ok(Sha256::digest(&preimage).into())
}

fn invoke_contract(invocation: &Invocation) -> Result<HostFunction> {
    let function_name: StringM<32> = invocation
        .method
        .as_bytes()
        .to_vec()
        .try_into()
        .map_err(|_| LedgerError::InvalidArgument(format!("method name too long: {}", invocation.method)))?;
    let args = invocation
        .args
        .iter()
        .map(ScArg::to_sc_val)
        .collect::<Result<Vec<_>>>()?;

    Ok(HostFunction::InvokeContract(InvokeContractArgs {
        contract_address: parse_address(&invocation.contract_id)?,
        function_name: ScSymbol(function_name),
        args: args.try_into()?,
    }))
}

fn unsigned_envelope(tx: Transaction) -> TransactionEnvelope {
    TransactionEnvelope::Tx(TransactionV1Envelope {
        tx,
        signatures: VecM::default(),
    })
}

fn encode_envelope(envelope: &TransactionEnvelope) -> Result<String> {
    Ok(BASE64.encode(envelope.to_xdr(Limits::none())?))
}

/// Apply simulation output: resource footprint, authorization entries and
/// the resource fee on top of the inclusion fee.
fn assemble(mut tx: Transaction, sim: &SimulateTransactionResult) -> Result<Transaction> {
    let data_xdr = sim.transaction_data.as_deref().ok_or_else(|| {
        LedgerError::Simulation("No transactionData in simulation result".to_string())
    })?;
    let soroban_data = SorobanTransactionData::from_xdr(BASE64.decode(data_xdr)?, Limits::none())?;

    let resource_fee: u64 = match sim.min_resource_fee.as_deref() {
        Some(fee) => fee.parse().map_err(|_| {
            LedgerError::Simulation(format!("Invalid minResourceFee '{}'", fee))
        })?,
        None => 0,
    };

    let mut operations = tx.operations.to_vec();
    for (index, op) in operations.iter_mut().enumerate() {
        let OperationBody::InvokeHostFunction(invoke) = &mut op.body else {
            continue;
        };
        if !invoke.auth.is_empty() {
            continue;
        }
        let Some(result) = sim.results.get(index) else {
            continue;
        };
        let entries = result
            .auth
            .iter()
            .map(|entry| {
                Ok(SorobanAuthorizationEntry::from_xdr(
                    BASE64.decode(entry)?,
                    Limits::none(),
                )?)
            })
            .collect::<Result<Vec<_>>>()?;
        invoke.auth = entries.try_into()?;
    }

    let fee = (tx.fee as u64).saturating_add(resource_fee);
    tx.fee = u32::try_from(fee).unwrap_or(u32::MAX);
    tx.operations = operations.try_into()?;
    tx.ext = TransactionExt::V1(soroban_data);
    Ok(tx)
}

fn return_value_from_meta(meta_xdr: &str) -> Result<Option<ScVal>> {
    let meta = TransactionMeta::from_xdr(BASE64.decode(meta_xdr)?, Limits::none())?;
    Ok(match meta {
        TransactionMeta::V3(v3) => v3.soroban_meta.map(|m| m.return_value),
        TransactionMeta::V4(v4) => v4.soroban_meta.and_then(|m| m.return_value),
        _ => None,
    })
}

/// Address of the contract a create-contract envelope will deploy:
/// `sha256(HashIdPreimage::ContractId { network_id, preimage })`.
/// `None` for envelopes that do not create a contract.
pub fn deployed_contract_id(
    network_id: &[u8; 32],
    envelope: &TransactionEnvelope,
) -> Result<Option<String>> {
    let TransactionEnvelope::Tx(v1) = envelope else {
        return Ok(None);
    };
    let preimage = v1.tx.operations.iter().find_map(|op| match &op.body {
        OperationBody::InvokeHostFunction(invoke) => match &invoke.host_function {
            HostFunction::CreateContract(args) => Some(args.contract_id_preimage.clone()),
            HostFunction::CreateContractV2(args) => Some(args.contract_id_preimage.clone()),
            _ => None,
        },
        _ => None,
    });
    let Some(contract_id_preimage) = preimage else {
        return Ok(None);
    };

    let id_preimage = HashIdPreimage::ContractId(HashIdPreimageContractId {
        network_id: Hash(*network_id),
        contract_id_preimage,
    });
    let id: [u8; 32] = Sha256::digest(id_preimage.to_xdr(Limits::none())?).into();
    Ok(Some(Contract(id).to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::SimulateHostFunctionResult;
    use serde_json::json;

    const TESTNET: &str = "Test SDF Network ; September 2015";

    // Test-only secret; never funded.
    fn secret() -> String {
        StrkeyPrivateKey([3u8; 32]).to_string()
    }

    fn sample_tx(source: [u8; 32]) -> Transaction {
        Transaction {
            source_account: MuxedAccount::Ed25519(Uint256(source)),
            fee: BASE_FEE,
            seq_num: SequenceNumber(11),
            cond: Preconditions::None,
            memo: Memo::None,
            operations: vec![Operation {
                source_account: None,
                body: OperationBody::InvokeHostFunction(InvokeHostFunctionOp {
                    host_function: invoke_contract(&Invocation::new(
                        Contract([4u8; 32]).to_string(),
                        "renew",
                        vec![ScArg::U32(1)],
                    ))
                    .unwrap(),
                    auth: VecM::default(),
                }),
            }]
            .try_into()
            .unwrap(),
            ext: TransactionExt::V0,
        }
    }

    /// SorobanTransactionData with an empty footprint and a 500 stroop fee.
    fn soroban_data_b64() -> String {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&0u32.to_be_bytes()); // ext
        bytes.extend_from_slice(&0u32.to_be_bytes()); // read_only
        bytes.extend_from_slice(&0u32.to_be_bytes()); // read_write
        bytes.extend_from_slice(&1u32.to_be_bytes()); // instructions
        bytes.extend_from_slice(&0u32.to_be_bytes());
        bytes.extend_from_slice(&0u32.to_be_bytes());
        bytes.extend_from_slice(&500i64.to_be_bytes()); // resource_fee
        BASE64.encode(bytes)
    }

    #[test]
    fn test_client_derives_public_key_from_secret() {
        let client = SorobanClient::new(SorobanConfig::new("http://localhost:8000", TESTNET, secret())).unwrap();
        let expected = StrkeyPublicKey(
            SigningKey::from_bytes(&[3u8; 32]).verifying_key().to_bytes(),
        )
        .to_string();
        assert_eq!(client.backend_public_key(), expected);
        assert_eq!(client.network_passphrase(), TESTNET);
    }

    #[test]
    fn test_missing_and_invalid_secret() {
        assert!(matches!(
            SorobanClient::new(SorobanConfig::new("http://x", TESTNET, "  ")),
            Err(LedgerError::MissingSigner)
        ));
        assert!(matches!(
            SorobanClient::new(SorobanConfig::new("http://x", TESTNET, "SNOTASECRET")),
            Err(LedgerError::InvalidSigner(_))
        ));
    }

    #[test]
    fn test_signature_verifies_against_tx_hash() {
        let client = SorobanClient::new(SorobanConfig::new("http://x", TESTNET, secret())).unwrap();
        let public = client.signing_key.verifying_key();
        let tx = sample_tx(public.to_bytes());
        let hash = transaction_hash(&network_id(TESTNET), &tx).unwrap();

        let TransactionEnvelope::Tx(envelope) = client.sign(tx).unwrap() else {
            panic!("expected v1 envelope");
        };
        let decorated = &envelope.signatures[0];
        assert_eq!(decorated.hint.0, public.to_bytes()[28..32]);

        let sig_bytes: [u8; 64] = decorated.signature.0.to_vec().try_into().unwrap();
        let signature = ed25519_dalek::Signature::from_bytes(&sig_bytes);
        assert!(public.verify_strict(&hash, &signature).is_ok());
    }

    #[test]
    fn test_assemble_adds_resource_fee_and_data() {
        let sim = SimulateTransactionResult {
            min_resource_fee: Some("12345".to_string()),
            transaction_data: Some(soroban_data_b64()),
            error: None,
            results: vec![SimulateHostFunctionResult {
                xdr: None,
                auth: vec![],
            }],
        };
        let tx = assemble(sample_tx([1u8; 32]), &sim).unwrap();
        assert_eq!(tx.fee, BASE_FEE + 12345);
        assert!(matches!(tx.ext, TransactionExt::V1(_)));
    }

    #[test]
    fn test_assemble_requires_transaction_data() {
        let sim = SimulateTransactionResult {
            min_resource_fee: Some("1".to_string()),
            transaction_data: None,
            error: None,
            results: vec![],
        };
        assert!(matches!(
            assemble(sample_tx([1u8; 32]), &sim),
            Err(LedgerError::Simulation(_))
        ));
    }

    /// Replays canned JSON-RPC results in order and records every method called.
    struct ScriptedTransport {
        responses: std::sync::Mutex<std::collections::VecDeque<(&'static str, Value)>>,
        methods: std::sync::Mutex<Vec<String>>,
    }

    impl ScriptedTransport {
        fn new(responses: Vec<(&'static str, Value)>) -> Arc<Self> {
            Arc::new(Self {
                responses: std::sync::Mutex::new(responses.into()),
                methods: std::sync::Mutex::new(Vec::new()),
            })
        }

        fn methods(&self) -> Vec<String> {
            self.methods.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RpcTransport for ScriptedTransport {
        fn url(&self) -> &str {
            "scripted://rpc"
        }

        async fn request(&self, method: &str, _params: Option<Value>) -> Result<Value> {
            self.methods.lock().unwrap().push(method.to_string());
            match self.responses.lock().unwrap().pop_front() {
                Some((expected, value)) => {
                    assert_eq!(expected, method, "unexpected rpc method");
                    Ok(value)
                }
                None => Err(LedgerError::Rpc(format!("no scripted response for {}", method))),
            }
        }
    }

    fn scripted_client(transport: Arc<ScriptedTransport>, poll_attempts: u32) -> SorobanClient {
        let mut config = SorobanConfig::new("scripted://rpc", TESTNET, secret());
        config.poll_attempts = poll_attempts;
        config.poll_interval = Duration::from_millis(1);
        SorobanClient::with_transport(config, transport).unwrap()
    }

    fn signed_invoke_xdr(client: &SorobanClient) -> String {
        let tx = sample_tx(client.signing_key.verifying_key().to_bytes());
        encode_envelope(&client.sign(tx).unwrap()).unwrap()
    }

    fn deploy_envelope(client: &SorobanClient, salt: [u8; 32]) -> TransactionEnvelope {
        let owner = client.signing_key.verifying_key().to_bytes();
        let mut tx = sample_tx(owner);
        tx.operations = vec![Operation {
            source_account: None,
            body: OperationBody::InvokeHostFunction(InvokeHostFunctionOp {
                host_function: HostFunction::CreateContract(CreateContractArgs {
                    contract_id_preimage: ContractIdPreimage::Address(
                        ContractIdPreimageFromAddress {
                            address: parse_address(&StrkeyPublicKey(owner).to_string()).unwrap(),
                            salt: Uint256(salt),
                        },
                    ),
                    executable: ContractExecutable::Wasm(Hash([8u8; 32])),
                }),
                auth: VecM::default(),
            }),
        }]
        .try_into()
        .unwrap();
        client.sign(tx).unwrap()
    }

    fn contract_return_value(bytes: &mut Vec<u8>, contract: [u8; 32]) {
        bytes.extend_from_slice(&18u32.to_be_bytes()); // SCV_ADDRESS
        bytes.extend_from_slice(&1u32.to_be_bytes()); // SC_ADDRESS_TYPE_CONTRACT
        bytes.extend_from_slice(&contract);
    }

    /// TransactionMeta v4 whose Soroban meta returns a contract address.
    fn meta_v4_b64(contract: [u8; 32]) -> String {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&4u32.to_be_bytes()); // union arm
        bytes.extend_from_slice(&0u32.to_be_bytes()); // ext
        bytes.extend_from_slice(&0u32.to_be_bytes()); // txChangesBefore
        bytes.extend_from_slice(&0u32.to_be_bytes()); // operations
        bytes.extend_from_slice(&0u32.to_be_bytes()); // txChangesAfter
        bytes.extend_from_slice(&1u32.to_be_bytes()); // sorobanMeta present
        bytes.extend_from_slice(&0u32.to_be_bytes()); // sorobanMeta.ext
        bytes.extend_from_slice(&1u32.to_be_bytes()); // returnValue present
        contract_return_value(&mut bytes, contract);
        bytes.extend_from_slice(&0u32.to_be_bytes()); // events
        bytes.extend_from_slice(&0u32.to_be_bytes()); // diagnosticEvents
        BASE64.encode(bytes)
    }

    /// TransactionMeta v3 whose Soroban meta returns a contract address.
    fn meta_v3_b64(contract: [u8; 32]) -> String {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&3u32.to_be_bytes());
        bytes.extend_from_slice(&0u32.to_be_bytes()); // ext
        bytes.extend_from_slice(&0u32.to_be_bytes()); // txChangesBefore
        bytes.extend_from_slice(&0u32.to_be_bytes()); // operations
        bytes.extend_from_slice(&0u32.to_be_bytes()); // txChangesAfter
        bytes.extend_from_slice(&1u32.to_be_bytes()); // sorobanMeta present
        bytes.extend_from_slice(&0u32.to_be_bytes()); // sorobanMeta.ext
        bytes.extend_from_slice(&0u32.to_be_bytes()); // events
        contract_return_value(&mut bytes, contract);
        bytes.extend_from_slice(&0u32.to_be_bytes()); // diagnosticEvents
        BASE64.encode(bytes)
    }

    fn pending() -> Value {
        json!({ "status": "PENDING", "hash": "tx-1" })
    }

    fn not_found() -> Value {
        json!({ "status": "NOT_FOUND" })
    }

    #[test]
    fn test_return_value_from_v3_and_v4_meta() {
        let v4 = return_value_from_meta(&meta_v4_b64([5u8; 32])).unwrap();
        assert_eq!(
            v4.as_ref().and_then(contract_strkey),
            Some(Contract([5u8; 32]).to_string())
        );

        let v3 = return_value_from_meta(&meta_v3_b64([6u8; 32])).unwrap();
        assert_eq!(
            v3.as_ref().and_then(contract_strkey),
            Some(Contract([6u8; 32]).to_string())
        );
    }

    #[test]
    fn test_deployed_contract_id_depends_on_salt_and_network() {
        let client = scripted_client(ScriptedTransport::new(vec![]), 1);
        let envelope = deploy_envelope(&client, [1u8; 32]);

        let id = deployed_contract_id(&client.network_id, &envelope).unwrap().unwrap();
        assert!(id.starts_with('C'));
        assert_eq!(
            deployed_contract_id(&client.network_id, &envelope).unwrap(),
            Some(id.clone())
        );

        let other_salt = deploy_envelope(&client, [2u8; 32]);
        assert_ne!(
            deployed_contract_id(&client.network_id, &other_salt).unwrap(),
            Some(id.clone())
        );
        let mainnet = network_id("Public Global Stellar Network ; September 2015");
        assert_ne!(deployed_contract_id(&mainnet, &envelope).unwrap(), Some(id));

        let invoke = client.sign(sample_tx([1u8; 32])).unwrap();
        assert_eq!(deployed_contract_id(&client.network_id, &invoke).unwrap(), None);
    }

    #[tokio::test]
    async fn test_empty_batch_is_rejected_before_rpc() {
        let transport = ScriptedTransport::new(vec![]);
        let client = scripted_client(transport.clone(), 1);
        let source = client.backend_public_key().to_string();

        let result = client.prepare_unsigned_batch_invoke(&source, vec![]).await;

        assert!(matches!(result, Err(LedgerError::EmptyBatch)));
        assert!(transport.methods().is_empty());
    }

    #[tokio::test]
    async fn test_rejected_submission_fails_without_polling() {
        for status in ["ERROR", "TRY_AGAIN_LATER"] {
            let transport = ScriptedTransport::new(vec![(
                "sendTransaction",
                json!({ "status": status, "hash": "tx-1", "errorResultXdr": "AAAA" }),
            )]);
            let client = scripted_client(transport.clone(), 5);

            let result = client.submit_signed(&signed_invoke_xdr(&client)).await;

            match result {
                Err(LedgerError::Submission { status: got, detail }) => {
                    assert_eq!(got, status);
                    assert_eq!(detail, "AAAA");
                }
                other => panic!("expected submission error, got {:?}", other),
            }
            assert_eq!(transport.methods(), vec!["sendTransaction"]);
        }
    }

    #[tokio::test]
    async fn test_failed_transaction_is_an_error() {
        let transport = ScriptedTransport::new(vec![
            ("sendTransaction", pending()),
            ("getTransaction", not_found()),
            (
                "getTransaction",
                json!({ "status": "FAILED", "resultXdr": "AAAAAAAAAGT////9AAAAAA==" }),
            ),
        ]);
        let client = scripted_client(transport.clone(), 5);

        let result = client.submit_signed(&signed_invoke_xdr(&client)).await;

        assert!(
            matches!(result, Err(LedgerError::TransactionFailed { ref hash, .. }) if hash == "tx-1"),
            "got {:?}",
            result
        );
        assert_eq!(transport.methods().len(), 3);
    }

    #[tokio::test]
    async fn test_polling_gives_up_after_configured_attempts() {
        let transport = ScriptedTransport::new(vec![
            ("sendTransaction", pending()),
            ("getTransaction", not_found()),
            ("getTransaction", not_found()),
            ("getTransaction", not_found()),
        ]);
        let client = scripted_client(transport.clone(), 3);

        let result = client.submit_signed(&signed_invoke_xdr(&client)).await;

        assert!(
            matches!(result, Err(LedgerError::Timeout { ref hash, attempts: 3 }) if hash == "tx-1"),
            "got {:?}",
            result
        );
        assert_eq!(transport.methods().len(), 4);
    }

    #[tokio::test]
    async fn test_success_is_reported_only_once_confirmed() {
        let transport = ScriptedTransport::new(vec![
            ("sendTransaction", pending()),
            ("getTransaction", not_found()),
            ("getTransaction", not_found()),
            (
                "getTransaction",
                json!({ "status": "SUCCESS", "ledger": 42, "resultMetaXdr": meta_v4_b64([5u8; 32]) }),
            ),
        ]);
        let client = scripted_client(transport.clone(), 10);

        let submitted = client.submit_signed(&signed_invoke_xdr(&client)).await.unwrap();

        assert_eq!(submitted.tx_hash, "tx-1");
        assert_eq!(submitted.contract_id, Some(Contract([5u8; 32]).to_string()));
        assert_eq!(
            transport.methods(),
            vec!["sendTransaction", "getTransaction", "getTransaction", "getTransaction"]
        );
    }

    #[tokio::test]
    async fn test_deploy_without_meta_uses_envelope_contract_id() {
        let transport = ScriptedTransport::new(vec![
            ("sendTransaction", pending()),
            ("getTransaction", json!({ "status": "SUCCESS", "ledger": 42 })),
        ]);
        let client = scripted_client(transport.clone(), 2);
        let envelope = deploy_envelope(&client, [9u8; 32]);
        let expected = deployed_contract_id(&client.network_id, &envelope).unwrap();

        let submitted = client
            .submit_signed(&encode_envelope(&envelope).unwrap())
            .await
            .unwrap();

        assert!(expected.is_some());
        assert_eq!(submitted.contract_id, expected);
    }

    #[test]
    fn test_network_id_is_passphrase_digest() {
        let id = network_id(TESTNET);
        assert_eq!(
            hex::encode(id),
            "cee0302d59844d32bdca915c8203dd44b33fbb7edc19051ea37abedf28ecd472"
        );
    }
}
