use chrono::{DateTime, Utc};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// User identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(Uuid);

impl UserId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Cluster identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClusterId(Uuid);

impl ClusterId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ClusterId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ClusterId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Rental identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RentalId(Uuid);

impl RentalId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for RentalId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RentalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RentalId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Ledger transaction identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionId(Uuid);

impl TransactionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Catalog listing identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ListingId(Uuid);

impl ListingId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ListingId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ListingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Dollar amount with precision handling
///
/// Internal precision is 6 decimal places; user-facing totals are rounded to
/// cents explicitly via [`UsdAmount::round_to_cents`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UsdAmount(Decimal);

impl UsdAmount {
    pub fn zero() -> Self {
        Self(Decimal::ZERO)
    }

    pub fn from_decimal(amount: Decimal) -> Self {
        Self(amount.round_dp(6))
    }

    pub fn from_f64(amount: f64) -> Option<Self> {
        Decimal::from_f64(amount).map(|d| Self(d.round_dp(6)))
    }

    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    pub fn add(&self, other: UsdAmount) -> Self {
        Self::from_decimal(self.0 + other.0)
    }

    /// Subtraction that refuses to go negative. Signed arithmetic belongs to
    /// ledger transaction amounts, which are plain `Decimal`.
    pub fn checked_sub(&self, other: UsdAmount) -> Option<Self> {
        if self.0 >= other.0 {
            Some(Self::from_decimal(self.0 - other.0))
        } else {
            None
        }
    }

    pub fn multiply(&self, factor: Decimal) -> Self {
        Self::from_decimal(self.0 * factor)
    }

    pub fn round_to_cents(&self) -> Self {
        Self(self.0.round_dp(2))
    }

    pub fn is_sufficient(&self, required: UsdAmount) -> bool {
        self.0 >= required.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }
}

impl fmt::Display for UsdAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Rental lifecycle states
///
/// A rental row is created directly in `Active` to reserve the cluster's
/// single rental slot before provisioning completes; a failed deploy deletes
/// the row rather than parking it in a dead state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RentalStatus {
    Active,
    Completed,
}

impl RentalStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, RentalStatus::Active)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RentalStatus::Completed)
    }

    pub fn can_transition_to(&self, next: RentalStatus) -> bool {
        matches!((self, next), (RentalStatus::Active, RentalStatus::Completed))
    }
}

impl fmt::Display for RentalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RentalStatus::Active => write!(f, "active"),
            RentalStatus::Completed => write!(f, "completed"),
        }
    }
}

impl FromStr for RentalStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(RentalStatus::Active),
            "completed" => Ok(RentalStatus::Completed),
            other => Err(format!("unknown rental status: {other}")),
        }
    }
}

/// Immutable hardware snapshot copied from the catalog at deploy time
///
/// Later catalog price changes never retroactively affect an existing rental.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpuConfiguration {
    pub gpu_vendor: String,
    pub gpu_model: String,
    pub gpu_memory_gb: u32,
    pub gpu_count: u32,
    pub hourly_price: UsdAmount,
}

/// Connection details for a provisioned instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceDetails {
    pub instance_id: String,
    pub instance_type: String,
    pub public_ip: Option<String>,
    pub public_dns: Option<String>,
}

/// Access credentials generated when the instance was provisioned
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceCredentials {
    pub key_name: String,
    pub private_key: String,
}

/// A GPU compute resource attached to a cluster for a span of time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rental {
    pub id: RentalId,
    pub cluster_id: ClusterId,
    pub user_id: UserId,
    pub configuration: GpuConfiguration,
    /// Price locked at deploy time; authoritative for all billing.
    pub hourly_price: UsdAmount,
    pub status: RentalStatus,
    pub ssh_keys: Vec<String>,
    pub email_enabled: bool,
    pub instance: Option<InstanceDetails>,
    pub credentials: Option<InstanceCredentials>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Rental {
    pub fn new(
        cluster_id: ClusterId,
        user_id: UserId,
        configuration: GpuConfiguration,
        ssh_keys: Vec<String>,
        email_enabled: bool,
    ) -> Self {
        let now = Utc::now();
        let hourly_price = configuration.hourly_price;
        Self {
            id: RentalId::new(),
            cluster_id,
            user_id,
            configuration,
            hourly_price,
            status: RentalStatus::Active,
            ssh_keys,
            email_enabled,
            instance: None,
            credentials: None,
            start_time: now,
            end_time: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// The single liveness predicate: Active and not past an explicit end.
    ///
    /// Open-ended rentals have no end time; legacy fixed-duration rentals
    /// carry one and expire implicitly when it passes.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.status.is_active() && self.end_time.map_or(true, |end| end > now)
    }

    pub fn elapsed(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.start_time
    }
}

/// Cost breakdown for a quote or a stored charge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostBreakdown {
    pub base_cost: UsdAmount,
    pub tax_rate: Decimal,
    pub tax_amount: UsdAmount,
    pub platform_fee_rate: Decimal,
    pub platform_fee_amount: UsdAmount,
    pub total_cost: UsdAmount,
}

/// Persistent cost record for one rental
///
/// Written at deploy with the deposit figures and overwritten in place at
/// terminate with the settlement figures. `transaction_id` always references
/// the deposit transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostRecord {
    pub id: Uuid,
    pub rental_id: RentalId,
    pub transaction_id: TransactionId,
    pub breakdown: CostBreakdown,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CostRecord {
    pub fn new(rental_id: RentalId, transaction_id: TransactionId, breakdown: CostBreakdown) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            rental_id,
            transaction_id,
            breakdown,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionStatus::Pending => write!(f, "pending"),
            TransactionStatus::Completed => write!(f, "completed"),
            TransactionStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for TransactionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TransactionStatus::Pending),
            "completed" => Ok(TransactionStatus::Completed),
            "failed" => Ok(TransactionStatus::Failed),
            other => Err(format!("unknown transaction status: {other}")),
        }
    }
}

/// Immutable record of money moving against a user balance
///
/// Negative amounts are debits. The idempotency key makes a replayed write a
/// read of the original row instead of a second charge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerTransaction {
    pub id: TransactionId,
    pub user_id: UserId,
    pub amount: Decimal,
    pub status: TransactionStatus,
    pub description: String,
    pub idempotency_key: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub balance: UsdAmount,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cluster {
    pub id: ClusterId,
    pub user_id: UserId,
    pub name: String,
    pub description: Option<String>,
    /// Hardware chosen for the next deploy; cleared or replaced freely while
    /// no rental is active.
    pub current_listing_id: Option<ListingId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Cluster {
    pub fn new(user_id: UserId, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: ClusterId::new(),
            user_id,
            name: name.into(),
            description: None,
            current_listing_id: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn test_configuration() -> GpuConfiguration {
        GpuConfiguration {
            gpu_vendor: "NVIDIA".to_string(),
            gpu_model: "A100".to_string(),
            gpu_memory_gb: 80,
            gpu_count: 1,
            hourly_price: UsdAmount::from_decimal(dec!(2.50)),
        }
    }

    #[test]
    fn test_usd_amount_arithmetic() {
        let a = UsdAmount::from_decimal(dec!(100.50));
        let b = UsdAmount::from_decimal(dec!(50.25));

        assert_eq!(a.add(b).as_decimal(), dec!(150.75));
        assert_eq!(a.checked_sub(b).unwrap().as_decimal(), dec!(50.25));
        assert!(b.checked_sub(a).is_none());
        assert_eq!(
            UsdAmount::from_decimal(dec!(1.005)).round_to_cents().as_decimal(),
            dec!(1.00)
        );
    }

    #[test]
    fn test_rental_status_transitions() {
        assert!(RentalStatus::Active.can_transition_to(RentalStatus::Completed));
        assert!(!RentalStatus::Completed.can_transition_to(RentalStatus::Active));
        assert!(!RentalStatus::Completed.can_transition_to(RentalStatus::Completed));
    }

    #[test]
    fn test_liveness_predicate() {
        let now = Utc::now();
        let mut rental = Rental::new(
            ClusterId::new(),
            UserId::new(),
            test_configuration(),
            vec![],
            true,
        );

        // Open-ended active rental is live
        assert!(rental.is_live(now));

        // Fixed-duration rental is live until its end passes
        rental.end_time = Some(now + chrono::Duration::hours(1));
        assert!(rental.is_live(now));
        rental.end_time = Some(now - chrono::Duration::seconds(1));
        assert!(!rental.is_live(now));

        // Completed is never live, with or without an end time
        rental.status = RentalStatus::Completed;
        rental.end_time = None;
        assert!(!rental.is_live(now));
    }

    #[test]
    fn test_rental_locks_price_from_snapshot() {
        let rental = Rental::new(
            ClusterId::new(),
            UserId::new(),
            test_configuration(),
            vec![],
            true,
        );
        assert_eq!(rental.hourly_price.as_decimal(), dec!(2.50));
    }
}
