//! Local point-in-time state snapshot.
//!
//! A `CacheDB<EmptyDB>`: whatever the caller loaded is authoritative, every
//! other account reads as empty. The hydrator only reads it; the engine
//! layers its own write overlay on top.

use alloy_primitives::{Address, Bytes, U256};
use revm::database::{CacheDB, EmptyDB};
use revm::primitives::KECCAK_EMPTY;
use revm::state::{AccountInfo, Bytecode};

/// Snapshot handed to the hydrator and the execution engine. Clone-able,
/// network-free.
pub type LocalSnapshot = CacheDB<EmptyDB>;

pub fn empty() -> LocalSnapshot {
    CacheDB::new(EmptyDB::new())
}

/// Account info held by the snapshot, if the account was loaded.
pub fn account_info(db: &LocalSnapshot, address: Address) -> Option<&AccountInfo> {
    db.cache.accounts.get(&address).map(|account| &account.info)
}

/// Code of `address` if the snapshot holds a non-empty one.
pub fn code(db: &LocalSnapshot, address: Address) -> Option<Bytes> {
    let info = account_info(db, address)?;
    let bytecode = match &info.code {
        Some(code) => code,
        None if info.code_hash != KECCAK_EMPTY => db.cache.contracts.get(&info.code_hash)?,
        None => return None,
    };
    let bytes = bytecode.original_bytes();
    (!bytes.is_empty()).then_some(bytes)
}

/// Size of `address`'s code in the snapshot; zero when absent.
pub fn code_size(db: &LocalSnapshot, address: Address) -> usize {
    code(db, address).map_or(0, |c| c.len())
}

/// Balance of `address` in the snapshot; zero when absent.
pub fn balance(db: &LocalSnapshot, address: Address) -> U256 {
    account_info(db, address).map_or(U256::ZERO, |info| info.balance)
}

/// Value of a storage slot if the snapshot holds it.
pub fn storage(db: &LocalSnapshot, address: Address, slot: U256) -> Option<U256> {
    db.cache.accounts.get(&address)?.storage.get(&slot).copied()
}

/// Inserts or replaces an account with the given balance and code.
pub fn insert_account(db: &mut LocalSnapshot, address: Address, balance: U256, code: Bytes) {
    let nonce = account_info(db, address).map_or(0, |info| info.nonce);
    let info = if code.is_empty() {
        AccountInfo {
            balance,
            nonce,
            ..Default::default()
        }
    } else {
        let bytecode = Bytecode::new_raw(code);
        let code_hash = bytecode.hash_slow();
        AccountInfo::new(balance, nonce, code_hash, bytecode)
    };
    db.insert_account_info(address, info);
}
