//! Statement builders for tenant databases.
//!
//! Table names are spliced into SQL, so every builder takes a [`TableName`],
//! which can only hold a plain identifier.

use txvault_core::TableName;

/// `CREATE TABLE IF NOT EXISTS` for a transfer table.
#[must_use]
pub fn create_transfer_table(table: &TableName) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {} (\
         id SERIAL PRIMARY KEY, \
         slot BIGINT NOT NULL, \
         signature TEXT NOT NULL UNIQUE, \
         fee_payer TEXT NOT NULL, \
         fee INTEGER NOT NULL, \
         description TEXT, \
         account_data JSONB NOT NULL, \
         instructions JSONB NOT NULL, \
         created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP)",
        table.quoted()
    )
}

/// Insert-or-ignore of one transfer row, binding `$1..$7` in column order.
#[must_use]
pub fn insert_transfer(table: &TableName) -> String {
    format!(
        "INSERT INTO {} (slot, signature, fee_payer, fee, description, account_data, instructions) \
         VALUES ($1, $2, $3, $4, $5, $6, $7) \
         ON CONFLICT (signature) DO NOTHING",
        table.quoted()
    )
}

/// `CREATE DATABASE` for an arbitrary database name.
///
/// The name comes from the metadata store and is not restricted to plain
/// identifiers, so it is quoted with embedded quotes doubled.
#[must_use]
pub fn create_database(name: &str) -> String {
    format!("CREATE DATABASE {}", quote_identifier(name))
}

/// Existence check against `pg_database`, binding the name as `$1`.
pub const DATABASE_EXISTS: &str =
    "SELECT EXISTS (SELECT 1 FROM pg_database WHERE datname = $1)";

/// Readiness probe.
pub const PING: &str = "SELECT 1";

/// SQLSTATE raised by `CREATE DATABASE` when the database already exists.
pub const DUPLICATE_DATABASE: &str = "42P04";

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
