use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{MoneyAmount, Unit};

pub type TransactionId = Uuid;
pub type AccountId = Uuid;
pub type LogId = Uuid;
pub type BoostId = Uuid;

/// What kind of movement a ledger entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    UserSavingEvent,
    Accrual,
    Capitalization,
    Withdrawal,
    Allocation,
    BoostRedemption,
    BoostRevocation,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::UserSavingEvent => "USER_SAVING_EVENT",
            TransactionType::Accrual => "ACCRUAL",
            TransactionType::Capitalization => "CAPITALIZATION",
            TransactionType::Withdrawal => "WITHDRAWAL",
            TransactionType::Allocation => "ALLOCATION",
            TransactionType::BoostRedemption => "BOOST_REDEMPTION",
            TransactionType::BoostRevocation => "BOOST_REVOCATION",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "USER_SAVING_EVENT" => Some(TransactionType::UserSavingEvent),
            "ACCRUAL" => Some(TransactionType::Accrual),
            "CAPITALIZATION" => Some(TransactionType::Capitalization),
            "WITHDRAWAL" => Some(TransactionType::Withdrawal),
            "ALLOCATION" => Some(TransactionType::Allocation),
            "BOOST_REDEMPTION" => Some(TransactionType::BoostRedemption),
            "BOOST_REVOCATION" => Some(TransactionType::BoostRevocation),
            _ => None,
        }
    }

    /// Types that count towards an account's balance.
    pub fn counts_towards_balance(&self) -> bool {
        matches!(
            self,
            TransactionType::UserSavingEvent
                | TransactionType::Accrual
                | TransactionType::Capitalization
                | TransactionType::Withdrawal
        )
    }
}

impl std::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle marker distinguishing funds actually moved (settled) from
/// in-flight or voided entries. Transitions are one-directional:
/// `Initiated -> Pending -> {Settled | Cancelled | Expired}`, and the three
/// end states are terminal. A settled entry is immutable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SettlementStatus {
    Initiated,
    Pending,
    Settled,
    Expired,
    Cancelled,
}

impl SettlementStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SettlementStatus::Initiated => "INITIATED",
            SettlementStatus::Pending => "PENDING",
            SettlementStatus::Settled => "SETTLED",
            SettlementStatus::Expired => "EXPIRED",
            SettlementStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "INITIATED" | "CREATED" => Some(SettlementStatus::Initiated),
            "PENDING" => Some(SettlementStatus::Pending),
            "SETTLED" => Some(SettlementStatus::Settled),
            "EXPIRED" => Some(SettlementStatus::Expired),
            "CANCELLED" => Some(SettlementStatus::Cancelled),
            _ => None,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            SettlementStatus::Initiated => 0,
            SettlementStatus::Pending => 1,
            SettlementStatus::Settled
            | SettlementStatus::Expired
            | SettlementStatus::Cancelled => 2,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.rank() == 2
    }

    /// True if moving from `self` to `next` follows the allowed order.
    pub fn can_transition_to(&self, next: SettlementStatus) -> bool {
        next.rank() > self.rank()
    }
}

impl std::fmt::Display for SettlementStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The sub-entity a float transaction attributes value to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AllocatedToType {
    FloatItself,
    EndUserAccount,
    BonusPool,
    ClientShare,
    AdminInstruction,
}

impl AllocatedToType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AllocatedToType::FloatItself => "FLOAT_ITSELF",
            AllocatedToType::EndUserAccount => "END_USER_ACCOUNT",
            AllocatedToType::BonusPool => "BONUS_POOL",
            AllocatedToType::ClientShare => "CLIENT_SHARE",
            AllocatedToType::AdminInstruction => "ADMIN_INSTRUCTION",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "FLOAT_ITSELF" => Some(AllocatedToType::FloatItself),
            "END_USER_ACCOUNT" => Some(AllocatedToType::EndUserAccount),
            "BONUS_POOL" => Some(AllocatedToType::BonusPool),
            "CLIENT_SHARE" => Some(AllocatedToType::ClientShare),
            "ADMIN_INSTRUCTION" => Some(AllocatedToType::AdminInstruction),
            _ => None,
        }
    }
}

/// Type of the backing entity a float transaction references.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BackingEntityType {
    AccountTransaction,
    AccrualEvent,
    AdminInstruction,
}

impl BackingEntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackingEntityType::AccountTransaction => "ACCOUNT_TRANSACTION",
            BackingEntityType::AccrualEvent => "ACCRUAL_EVENT",
            BackingEntityType::AdminInstruction => "ADMIN_INSTRUCTION",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "ACCOUNT_TRANSACTION" => Some(BackingEntityType::AccountTransaction),
            "ACCRUAL_EVENT" => Some(BackingEntityType::AccrualEvent),
            "ADMIN_INSTRUCTION" => Some(BackingEntityType::AdminInstruction),
            _ => None,
        }
    }
}

/// Types of float log rows: the accrual marker, the anomaly family written by
/// reconciliation, and admin-workflow rows owned by the external resolve
/// screens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FloatLogType {
    WholeFloatAccrual,
    BalanceMismatch,
    AllocationTotalMismatch,
    AdminBalanceRecon,
}

impl FloatLogType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FloatLogType::WholeFloatAccrual => "WHOLE_FLOAT_ACCRUAL",
            FloatLogType::BalanceMismatch => "BALANCE_MISMATCH",
            FloatLogType::AllocationTotalMismatch => "ALLOCATION_TOTAL_MISMATCH",
            FloatLogType::AdminBalanceRecon => "ADMIN_BALANCE_RECON",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "WHOLE_FLOAT_ACCRUAL" => Some(FloatLogType::WholeFloatAccrual),
            "BALANCE_MISMATCH" => Some(FloatLogType::BalanceMismatch),
            "ALLOCATION_TOTAL_MISMATCH" => Some(FloatLogType::AllocationTotalMismatch),
            "ADMIN_BALANCE_RECON" => Some(FloatLogType::AdminBalanceRecon),
            _ => None,
        }
    }
}

impl std::fmt::Display for FloatLogType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An end-user savings account, tied to exactly one client float.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub account_id: AccountId,
    pub owner_user_id: Uuid,
    pub client_id: String,
    pub float_id: String,
    pub creation_time: DateTime<Utc>,
}

/// The account-side row of a saving event. A settled row carries the ids of
/// its two float-side counterparts; all three reference each other and are
/// written all-or-nothing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountTransaction {
    pub transaction_id: TransactionId,
    pub account_id: AccountId,
    pub transaction_type: TransactionType,
    pub amount: MoneyAmount,
    pub float_id: String,
    pub client_id: String,
    pub settlement_status: SettlementStatus,
    pub initiation_time: DateTime<Utc>,
    pub settlement_time: Option<DateTime<Utc>>,
    pub creation_time: DateTime<Utc>,
    pub float_adjust_tx_id: Option<TransactionId>,
    pub float_alloc_tx_id: Option<TransactionId>,
}

/// A float-side row: either an adjustment of the float itself or an
/// allocation of part of it to a sub-entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FloatTransaction {
    pub transaction_id: TransactionId,
    pub client_id: String,
    pub float_id: String,
    pub transaction_type: TransactionType,
    pub amount: MoneyAmount,
    pub allocated_to_type: AllocatedToType,
    pub allocated_to_id: String,
    pub settlement_state: SettlementStatus,
    pub related_entity_type: Option<BackingEntityType>,
    pub related_entity_id: Option<String>,
    pub creation_time: DateTime<Utc>,
}

/// A float log row: accrual reference marks and anomalies awaiting human
/// review. Only the external admin workflow flips `resolved`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FloatLog {
    pub log_id: LogId,
    pub client_id: String,
    pub float_id: String,
    pub log_type: FloatLogType,
    pub log_context: serde_json::Value,
    pub reference_time: DateTime<Utc>,
    pub creation_time: DateTime<Utc>,
    pub resolved: bool,
}

/// Audit row recorded alongside settlement-status updates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionLog {
    pub log_id: LogId,
    pub transaction_id: TransactionId,
    pub log_type: String,
    pub log_context: serde_json::Value,
    pub creation_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BoostStatus {
    Active,
    Redeemed,
    Expired,
}

impl BoostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BoostStatus::Active => "ACTIVE",
            BoostStatus::Redeemed => "REDEEMED",
            BoostStatus::Expired => "EXPIRED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "ACTIVE" => Some(BoostStatus::Active),
            "REDEEMED" => Some(BoostStatus::Redeemed),
            "EXPIRED" => Some(BoostStatus::Expired),
            _ => None,
        }
    }
}

/// An inducement offered against an account; only its expiry and count are
/// relevant here, the offer machinery lives elsewhere.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Boost {
    pub boost_id: BoostId,
    pub account_id: AccountId,
    pub boost_status: BoostStatus,
    pub expiry_time: DateTime<Utc>,
    pub creation_time: DateTime<Utc>,
}

/// Sign filter for flow aggregations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowSign {
    Inflow,
    Outflow,
    Both,
}

/// A balance plus the moment of the last settled entry contributing to it.
#[derive(Debug, Clone)]
pub struct AccountBalance {
    pub amount: MoneyAmount,
    pub last_settled_time: Option<DateTime<Utc>>,
}

/// Sum per-unit group totals into a single hundredth-cent amount. Raw sums
/// across differing units must never be added directly.
pub fn standardize_unit_sums(currency: &str, unit_sums: &[(Unit, i64)]) -> MoneyAmount {
    let total = unit_sums
        .iter()
        .map(|(unit, sum)| super::convert_amount(*sum, *unit, Unit::HundredthCent))
        .sum();
    MoneyAmount::new(total, Unit::HundredthCent, currency)
}
