//! Chain-facing data types shared by the transaction pipeline, accounts and runner
//!
//! These mirror the node's data model closely enough for an SDK binding to map
//! them onto the wire, without this crate owning the RPC encoding itself.

use crate::error::{RunnerError, RunnerResult};

use alloy_primitives::U256;
use borsh::{BorshDeserialize, BorshSerialize};
use lazy_static::lazy_static;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign};
use std::str::FromStr;

/// Gas units attached to or burnt by a single action or receipt
pub type Gas = u64;

/// Token amount in yoctoNEAR
pub type Balance = u128;

/// 10^24 yoctoNEAR
pub const ONE_NEAR: Balance = 1_000_000_000_000_000_000_000_000;

/// One teragas
pub const TGAS: Gas = 1_000_000_000_000;

lazy_static! {
    static ref ACCOUNT_ID_RE: Regex =
        Regex::new(r"^(([a-z\d]+[\-_])*[a-z\d]+\.)*([a-z\d]+[\-_])*[a-z\d]+$").unwrap();
}

const MIN_ACCOUNT_ID_LEN: usize = 2;
const MAX_ACCOUNT_ID_LEN: usize = 64;

/// Validated account identifier, e.g. `alice.test.near`
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    BorshSerialize,
    BorshDeserialize,
    Serialize,
    Deserialize,
)]
#[serde(try_from = "String", into = "String")]
pub struct AccountId(String);

impl AccountId {
    /// Validate and wrap an account id
    pub fn new(account_id: impl Into<String>) -> RunnerResult<Self> {
        let account_id = account_id.into();
        let invalid = |reason: &str| RunnerError::InvalidAccountId {
            account_id: account_id.clone(),
            reason: reason.to_string(),
        };

        if account_id.len() < MIN_ACCOUNT_ID_LEN {
            return Err(invalid("too short"));
        }
        if account_id.len() > MAX_ACCOUNT_ID_LEN {
            return Err(invalid("too long"));
        }
        if !ACCOUNT_ID_RE.is_match(&account_id) {
            return Err(invalid("must be lowercase alphanumeric parts separated by '.', '-' or '_'"));
        }

        Ok(Self(account_id))
    }

    /// Build `<name>.<self>`
    pub fn sub_account(&self, name: &str) -> RunnerResult<AccountId> {
        AccountId::new(format!("{}.{}", name, self.0))
    }

    /// True when `self` is a direct child of `parent`
    pub fn is_sub_account_of(&self, parent: &AccountId) -> bool {
        self.0
            .strip_suffix(parent.as_str())
            .and_then(|prefix| prefix.strip_suffix('.'))
            .map_or(false, |name| !name.is_empty() && !name.contains('.'))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for AccountId {
    type Err = RunnerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AccountId::new(s)
    }
}

impl TryFrom<String> for AccountId {
    type Error = RunnerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        AccountId::new(value)
    }
}

impl TryFrom<&str> for AccountId {
    type Error = RunnerError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        AccountId::new(value)
    }
}

impl From<AccountId> for String {
    fn from(id: AccountId) -> Self {
        id.0
    }
}

/// Key curve
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
#[borsh(use_discriminant = true)]
pub enum KeyType {
    Ed25519 = 0,
    Secp256k1 = 1,
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyType::Ed25519 => f.write_str("ed25519"),
            KeyType::Secp256k1 => f.write_str("secp256k1"),
        }
    }
}

/// Public half of an access key
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct PublicKey {
    pub key_type: KeyType,
    pub data: Vec<u8>,
}

impl PublicKey {
    pub fn ed25519(data: impl Into<Vec<u8>>) -> Self {
        Self {
            key_type: KeyType::Ed25519,
            data: data.into(),
        }
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.key_type, hex::encode(&self.data))
    }
}

/// Signature over a transaction hash
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Signature {
    pub key_type: KeyType,
    pub bytes: Vec<u8>,
}

/// 32-byte hash (block hashes, transaction hashes, receipt ids)
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    BorshSerialize,
    BorshDeserialize,
    Serialize,
    Deserialize,
)]
pub struct CryptoHash(pub [u8; 32]);

impl CryptoHash {
    /// SHA-256 of `bytes`
    pub fn hash_bytes(bytes: &[u8]) -> Self {
        CryptoHash(Sha256::digest(bytes).into())
    }
}

impl fmt::Display for CryptoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// Permission scope of an access key
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub enum AccessKeyPermission {
    FunctionCall {
        allowance: Option<Balance>,
        receiver_id: AccountId,
        method_names: Vec<String>,
    },
    FullAccess,
}

/// Access key as stored on chain
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct AccessKey {
    pub nonce: u64,
    pub permission: AccessKeyPermission,
}

/// A single transaction action. The transaction pipeline never looks inside.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub enum Action {
    CreateAccount,
    DeployContract {
        code: Vec<u8>,
    },
    FunctionCall {
        method_name: String,
        args: Vec<u8>,
        gas: Gas,
        deposit: Balance,
    },
    Transfer {
        deposit: Balance,
    },
    Stake {
        stake: Balance,
        public_key: PublicKey,
    },
    AddKey {
        public_key: PublicKey,
        access_key: AccessKey,
    },
    DeleteKey {
        public_key: PublicKey,
    },
    DeleteAccount {
        beneficiary_id: AccountId,
    },
}

impl Action {
    pub fn function_call(
        method_name: impl Into<String>,
        args: impl Into<Vec<u8>>,
        gas: Gas,
        deposit: Balance,
    ) -> Self {
        Action::FunctionCall {
            method_name: method_name.into(),
            args: args.into(),
            gas,
            deposit,
        }
    }

    pub fn transfer(deposit: Balance) -> Self {
        Action::Transfer { deposit }
    }

    pub fn deploy_contract(code: impl Into<Vec<u8>>) -> Self {
        Action::DeployContract { code: code.into() }
    }

    pub fn add_full_access_key(public_key: PublicKey) -> Self {
        Action::AddKey {
            public_key,
            access_key: AccessKey {
                nonce: 0,
                permission: AccessKeyPermission::FullAccess,
            },
        }
    }

    /// Action name for logs and metrics
    pub fn name(&self) -> &'static str {
        match self {
            Action::CreateAccount => "create_account",
            Action::DeployContract { .. } => "deploy_contract",
            Action::FunctionCall { .. } => "function_call",
            Action::Transfer { .. } => "transfer",
            Action::Stake { .. } => "stake",
            Action::AddKey { .. } => "add_key",
            Action::DeleteKey { .. } => "delete_key",
            Action::DeleteAccount { .. } => "delete_account",
        }
    }
}

/// Transaction ready to be signed
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct UnsignedTransaction {
    signer_id: AccountId,
    public_key: PublicKey,
    nonce: u64,
    receiver_id: AccountId,
    block_hash: CryptoHash,
    actions: Vec<Action>,
}

impl UnsignedTransaction {
    pub fn new(
        signer_id: AccountId,
        public_key: PublicKey,
        nonce: u64,
        receiver_id: AccountId,
        block_hash: CryptoHash,
        actions: Vec<Action>,
    ) -> Self {
        Self {
            signer_id,
            public_key,
            nonce,
            receiver_id,
            block_hash,
            actions,
        }
    }

    pub fn signer_id(&self) -> &AccountId {
        &self.signer_id
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    pub fn receiver_id(&self) -> &AccountId {
        &self.receiver_id
    }

    pub fn block_hash(&self) -> &CryptoHash {
        &self.block_hash
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    /// Borsh encoding of the transaction
    pub fn encode(&self) -> RunnerResult<Vec<u8>> {
        borsh::to_vec(self).map_err(RunnerError::Io)
    }

    /// Transaction hash, which is also the payload a key pair signs
    pub fn hash(&self) -> RunnerResult<CryptoHash> {
        Ok(CryptoHash::hash_bytes(&self.encode()?))
    }
}

/// Transaction with its signature attached
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct SignedTransaction {
    transaction: UnsignedTransaction,
    signature: Signature,
}

impl SignedTransaction {
    pub fn new(transaction: UnsignedTransaction, signature: Signature) -> Self {
        Self {
            transaction,
            signature,
        }
    }

    pub fn transaction(&self) -> &UnsignedTransaction {
        &self.transaction
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn hash(&self) -> RunnerResult<CryptoHash> {
        self.transaction.hash()
    }

    pub fn encode(&self) -> RunnerResult<Vec<u8>> {
        borsh::to_vec(self).map_err(RunnerError::Io)
    }
}

/// Arbitrary-precision, non-negative gas amount used for accumulation
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct GasValue(U256);

impl GasValue {
    pub const ZERO: GasValue = GasValue(U256::ZERO);

    pub fn as_u256(&self) -> U256 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == U256::ZERO
    }
}

impl From<u64> for GasValue {
    fn from(gas: u64) -> Self {
        GasValue(U256::from(gas))
    }
}

impl From<u128> for GasValue {
    fn from(gas: u128) -> Self {
        GasValue(U256::from(gas))
    }
}

impl From<U256> for GasValue {
    fn from(gas: U256) -> Self {
        GasValue(gas)
    }
}

impl Add for GasValue {
    type Output = GasValue;

    fn add(self, rhs: GasValue) -> GasValue {
        GasValue(self.0.saturating_add(rhs.0))
    }
}

impl AddAssign for GasValue {
    fn add_assign(&mut self, rhs: GasValue) {
        *self = *self + rhs;
    }
}

impl Sum for GasValue {
    fn sum<I: Iterator<Item = GasValue>>(iter: I) -> Self {
        iter.fold(GasValue::ZERO, Add::add)
    }
}

impl fmt::Display for GasValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Status of a transaction or receipt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    SuccessValue(Vec<u8>),
    SuccessNoValue,
    SuccessReceiptId(CryptoHash),
    Failure(String),
}

impl ExecutionStatus {
    pub fn is_success(&self) -> bool {
        !matches!(self, ExecutionStatus::Failure(_))
    }
}

/// Outcome of a single execution unit (the transaction itself or one receipt)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeView {
    pub id: CryptoHash,
    pub executor_id: AccountId,
    pub logs: Vec<String>,
    pub gas_burnt: Gas,
    pub status: ExecutionStatus,
}

/// Final result of a submitted transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub transaction_hash: CryptoHash,
    pub status: ExecutionStatus,
    pub transaction_outcome: OutcomeView,
    pub receipts_outcome: Vec<OutcomeView>,
}

impl ExecutionOutcome {
    pub fn succeeded(&self) -> bool {
        self.status.is_success()
    }

    pub fn failed(&self) -> bool {
        !self.succeeded()
    }

    pub fn failure_message(&self) -> Option<&str> {
        match &self.status {
            ExecutionStatus::Failure(message) => Some(message),
            _ => None,
        }
    }

    /// Logs of the transaction followed by every receipt, in execution order
    pub fn logs(&self) -> Vec<&str> {
        std::iter::once(&self.transaction_outcome)
            .chain(self.receipts_outcome.iter())
            .flat_map(|outcome| outcome.logs.iter().map(String::as_str))
            .collect()
    }

    /// Burnt gas of the transaction and of each receipt
    pub fn gas_burnt_values(&self) -> Vec<GasValue> {
        std::iter::once(&self.transaction_outcome)
            .chain(self.receipts_outcome.iter())
            .map(|outcome| GasValue::from(outcome.gas_burnt))
            .collect()
    }

    pub fn total_gas_burnt(&self) -> GasValue {
        self.gas_burnt_values().into_iter().sum()
    }

    pub fn success_value(&self) -> Option<&[u8]> {
        match &self.status {
            ExecutionStatus::SuccessValue(value) => Some(value),
            _ => None,
        }
    }

    /// Decode the success value as JSON
    pub fn json<T: DeserializeOwned>(&self) -> RunnerResult<T> {
        let value = self.checked_value()?;
        Ok(serde_json::from_slice(value)?)
    }

    /// Decode the success value as borsh
    pub fn borsh<T: BorshDeserialize>(&self) -> RunnerResult<T> {
        let value = self.checked_value()?;
        T::try_from_slice(value).map_err(|e| RunnerError::Decode(e.to_string()))
    }

    fn checked_value(&self) -> RunnerResult<&[u8]> {
        match &self.status {
            ExecutionStatus::SuccessValue(value) => Ok(value),
            ExecutionStatus::Failure(message) => Err(RunnerError::ExecutionFailed {
                tx_hash: self.transaction_hash.to_string(),
                message: message.clone(),
            }),
            other => Err(RunnerError::Decode(format!(
                "transaction {} returned no value ({:?})",
                self.transaction_hash, other
            ))),
        }
    }
}

/// Access key state needed to build a transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessKeyView {
    pub nonce: u64,
    pub block_hash: CryptoHash,
}

/// Account state from a view_account query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountView {
    pub amount: Balance,
    pub locked: Balance,
    pub code_hash: CryptoHash,
    pub storage_usage: u64,
}

/// Result of a read-only function call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewResult {
    pub result: Vec<u8>,
    pub logs: Vec<String>,
}

/// One raw key/value pair of contract storage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateItem {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl StateItem {
    pub fn new(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Contract storage entry to inject via sandbox state patching
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateRecord {
    pub account_id: AccountId,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}
