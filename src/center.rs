//! kuang's central, shared state.

use kuang_cfg::Config;
use kuang_store::Store;

use crate::blacklist::{IpBlacklist, NameBlacklist};
use crate::cache::Cache;

//----------- Center -------------------------------------------------------------

/// The state every unit needs a handle to: the configuration, the
/// relational store, the IP-address cache, and the blacklists.
pub struct Center {
    pub config: Config,
    pub store: Store,
    pub cache: Cache,
    pub ip_blacklist: IpBlacklist,
    pub name_blacklist: NameBlacklist,
}

impl Center {
    /// Build a fresh `Center` from a loaded configuration, opening (or
    /// creating) the relational store at `<base_dir>/kuang.db`.
    pub fn new(config: Config) -> Result<Self, kuang_store::DbError> {
        let store = Store::open(&config.db_path())?;
        Ok(Self {
            config,
            store,
            cache: Cache::new(),
            ip_blacklist: IpBlacklist::default_list(),
            name_blacklist: NameBlacklist::default_list(),
        })
    }
}
