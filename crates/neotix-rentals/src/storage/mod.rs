pub mod catalog;
pub mod clusters;
pub mod costs;
pub mod ledger;
pub mod memory;
pub mod postgres;
pub mod rentals;

pub use catalog::SqlCatalogService;
pub use clusters::{ClusterRepository, SqlClusterRepository};
pub use costs::{CostRecordRepository, SqlCostRecordRepository};
pub use ledger::{LedgerRepository, SqlLedgerRepository};
pub use postgres::PostgresConnection;
pub use rentals::{RentalRepository, SqlRentalRepository};
