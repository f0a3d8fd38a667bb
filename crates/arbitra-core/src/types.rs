/// PROTOCOL DATA MODEL PRIMITIVES
///
/// Addresses and identifiers render as `0x`-prefixed hex everywhere
/// (logs, YAML, JSON) so that event payloads can be audited by hand.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha3::{Digest, Keccak256};
use std::fmt;
use std::str::FromStr;

use crate::config::FeeShares;

/// Token amounts in minimal units.
pub type Amount = u128;

/// Keccak-256 digest of `data`.
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

fn parse_hex<const N: usize>(s: &str) -> Result<[u8; N], String> {
    let raw = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(raw).map_err(|e| format!("invalid hex '{}': {}", s, e))?;
    if bytes.len() != N {
        return Err(format!("expected {} bytes, got {}", N, bytes.len()));
    }
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes);
    Ok(out)
}

/// 20-byte account identity (customer, broker, validator, token or custody).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address(pub [u8; 20]);

impl Address {
    pub const ZERO: Address = Address([0u8; 20]);

    /// Sink for burned stake (`0x...dead`).
    pub const BURN: Address = Address([
        0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0xde, 0xad,
    ]);

    /// Deterministic address derived from a human label (last 20 bytes of
    /// Keccak-256). Used by simulations and tests to name actors.
    pub fn from_label(label: &str) -> Self {
        let digest = keccak256(label.as_bytes());
        let mut out = [0u8; 20];
        out.copy_from_slice(&digest[12..]);
        Address(out)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self)
    }
}

impl FromStr for Address {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_hex::<20>(s).map(Address)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Caller-supplied process identifier, unique per customer.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcessId(pub [u8; 32]);

impl ProcessId {
    /// Keccak-256 of a label, e.g. `ProcessId::from_label("123")`.
    pub fn from_label(label: &str) -> Self {
        ProcessId(keccak256(label.as_bytes()))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProcessId({})", self)
    }
}

impl FromStr for ProcessId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_hex::<32>(s).map(ProcessId)
    }
}

impl Serialize for ProcessId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ProcessId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Composite key of a process record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProcessKey {
    pub customer: Address,
    pub process_id: ProcessId,
}

impl ProcessKey {
    pub fn new(customer: Address, process_id: ProcessId) -> Self {
        ProcessKey { customer, process_id }
    }
}

impl fmt::Display for ProcessKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.customer, self.process_id)
    }
}

/// Deposit rail of a process. Fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Currency {
    /// Native value carried by the call itself
    Native,
    /// External fungible token, pulled after approval
    Token(Address),
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Currency::Native => write!(f, "native"),
            Currency::Token(addr) => write!(f, "token:{}", addr),
        }
    }
}

/// Lifecycle of a process. Variants are declared in transition order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ProcessState {
    Created,
    CostPending,
    CostSet,
    Deposited,
    Terminating,
    Completed,
}

impl ProcessState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessState::Created => "CREATED",
            ProcessState::CostPending => "COST_PENDING",
            ProcessState::CostSet => "COST_SET",
            ProcessState::Deposited => "DEPOSITED",
            ProcessState::Terminating => "TERMINATING",
            ProcessState::Completed => "COMPLETED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ProcessState::Completed)
    }

    /// Whether `next` is a legal successor (self-loops included for the
    /// states that accept repeated calls).
    pub fn can_advance_to(&self, next: ProcessState) -> bool {
        use ProcessState::*;
        matches!(
            (self, next),
            (Created, CostPending)
                | (Created, CostSet)
                | (CostPending, CostPending)
                | (CostPending, CostSet)
                | (CostSet, Deposited)
                | (Deposited, Deposited)
                | (Deposited, Terminating)
                | (Terminating, Terminating)
                | (Terminating, Completed)
        )
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registered service offering: a broker plus its validator panel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    /// Broker identity; receives broker rewards and declares actions
    pub admin: Address,
    /// Panel eligible for selection, in registration order
    pub validators: Vec<Address>,
    /// Completion-time split of the retained fee
    pub shares: FeeShares,
}

impl Service {
    pub fn is_validator(&self, who: &Address) -> bool {
        self.validators.contains(who)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_display_roundtrip() {
        let addr = Address::from_label("broker");
        let parsed: Address = addr.to_string().parse().unwrap();
        assert_eq!(addr, parsed);
        assert!(addr.to_string().starts_with("0x"));
        assert_eq!(addr.to_string().len(), 42);
    }

    #[test]
    fn test_address_rejects_wrong_length() {
        assert!("0x1234".parse::<Address>().is_err());
        assert!("not-hex".parse::<Address>().is_err());
    }

    #[test]
    fn test_burn_address() {
        assert_eq!(
            Address::BURN.to_string(),
            "0x000000000000000000000000000000000000dead"
        );
        assert!(!Address::BURN.is_zero());
        assert!(Address::ZERO.is_zero());
    }

    #[test]
    fn test_process_id_matches_keccak_of_label() {
        // keccak256("123"), the id external clients derive for product "123"
        let id = ProcessId::from_label("123");
        assert_eq!(
            id.to_string(),
            "0x64e604787cbf194841e7b68d7cd28786f6c9a0a3ab9f8b0a0e87cb4387ab0107"
        );
        assert_eq!(id, ProcessId::from_label("123"));
        assert_ne!(id, ProcessId::from_label("124"));
    }

    #[test]
    fn test_state_transitions() {
        use ProcessState::*;
        assert!(Created.can_advance_to(CostPending));
        assert!(CostPending.can_advance_to(CostSet));
        assert!(CostSet.can_advance_to(Deposited));
        assert!(Deposited.can_advance_to(Terminating));
        assert!(Terminating.can_advance_to(Completed));

        assert!(!Created.can_advance_to(Deposited));
        assert!(!CostSet.can_advance_to(Terminating));
        assert!(!Completed.can_advance_to(Completed));
        assert!(Completed.is_terminal());
        assert!(Created < Completed);
    }

    #[test]
    fn test_currency_serde() {
        let token = Currency::Token(Address::from_label("usdc"));
        let json = serde_json::to_string(&token).unwrap();
        let back: Currency = serde_json::from_str(&json).unwrap();
        assert_eq!(token, back);
        assert_eq!(serde_json::to_string(&Currency::Native).unwrap(), "\"native\"");
    }
}
