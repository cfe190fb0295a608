use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;

use crate::engine::{BookingPolicy, Engine};
use crate::limits::*;
use crate::notify::NotifyHub;
use crate::reaper;

/// Settings every library engine is created with.
#[derive(Debug, Clone, Copy)]
pub struct TenantOptions {
    pub compact_threshold: u64,
    /// `None` runs no reaper: bookings then never expire on their own.
    pub reaper_interval: Option<Duration>,
    pub policy: BookingPolicy,
}

impl Default for TenantOptions {
    fn default() -> Self {
        Self {
            compact_threshold: 1000,
            reaper_interval: Some(Duration::from_secs(30)),
            policy: BookingPolicy::default(),
        }
    }
}

/// One engine per library. The library is the database name of the pgwire
/// connection; each gets its own WAL, reaper and compactor.
pub struct TenantManager {
    engines: DashMap<String, Arc<Engine>>,
    data_dir: PathBuf,
    options: TenantOptions,
}

impl TenantManager {
    pub fn new(data_dir: PathBuf, options: TenantOptions) -> Self {
        Self {
            engines: DashMap::new(),
            data_dir,
            options,
        }
    }

    /// Get or lazily create the engine for `tenant`.
    pub fn get_or_create(&self, tenant: &str) -> io::Result<Arc<Engine>> {
        if let Some(engine) = self.engines.get(tenant) {
            return Ok(engine.value().clone());
        }
        if self.engines.len() >= MAX_TENANTS {
            return Err(io::Error::other("too many libraries"));
        }
        let stem = wal_file_stem(tenant)?;

        // Two connections can race to the same new library; the entry API
        // makes sure only one engine (and one WAL writer) survives.
        let entry = self.engines.entry(tenant.to_string());
        if let dashmap::mapref::entry::Entry::Occupied(existing) = &entry {
            return Ok(existing.get().clone());
        }

        let wal_path = self.data_dir.join(format!("{stem}.wal"));
        let notify = Arc::new(NotifyHub::new());
        let engine = Arc::new(Engine::new(wal_path, notify)?.with_policy(self.options.policy));

        if let Some(every) = self.options.reaper_interval {
            tokio::spawn(reaper::run_reaper(engine.clone(), every));
        }
        tokio::spawn(reaper::run_compactor(engine.clone(), self.options.compact_threshold));

        entry.insert(engine.clone());
        metrics::gauge!(crate::observability::TENANTS_ACTIVE).set(self.engines.len() as f64);
        tracing::info!("library {tenant} loaded");
        Ok(engine)
    }

    pub fn tenant_count(&self) -> usize {
        self.engines.len()
    }
}

/// File stem for a library's WAL. The stem is the library name itself, so two
/// libraries never share a file; names outside `[A-Za-z0-9_-]` are refused.
fn wal_file_stem(library: &str) -> io::Result<&str> {
    if library.is_empty() {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "empty library name"));
    }
    if library.len() > MAX_TENANT_NAME_LEN {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "library name too long"));
    }
    if !library.bytes().all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-')) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("library name {library:?} may only use letters, digits, '_' and '-'"),
        ));
    }
    Ok(library)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use std::fs;

    fn test_data_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("carrel_test_tenant").join(name);
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn manager(dir: PathBuf) -> TenantManager {
        let options = TenantOptions {
            reaper_interval: None,
            ..TenantOptions::default()
        };
        TenantManager::new(dir, options)
    }

    #[tokio::test]
    async fn tenant_isolation() {
        let tm = manager(test_data_dir("isolation"));

        let main_library = tm.get_or_create("main_library").unwrap();
        let law_library = tm.get_or_create("law_library").unwrap();

        main_library.create_seat("A1", PhysicalStatus::Empty).await.unwrap();
        law_library.create_seat("A1", PhysicalStatus::Empty).await.unwrap();

        main_library
            .create_booking(BookingRequest {
                seat_id: "A1".into(),
                student_id: "s1".into(),
                start_slot: 20,
                end_slot: 24,
                pin_code: "1234".into(),
            })
            .await
            .unwrap();

        let range = TimeSlot::new(20, 24);
        assert!(!main_library.is_seat_available("A1", &range).await.unwrap());
        assert!(law_library.is_seat_available("A1", &range).await.unwrap());
        assert!(law_library.student_bookings("s1").is_empty());
    }

    #[tokio::test]
    async fn tenant_lazy_creation() {
        let dir = test_data_dir("lazy");
        let tm = manager(dir.clone());

        let entries: Vec<_> = fs::read_dir(&dir).unwrap().collect();
        assert!(entries.is_empty());

        let _eng = tm.get_or_create("my_db").unwrap();
        assert!(dir.join("my_db.wal").exists());
        assert_eq!(tm.tenant_count(), 1);
    }

    #[tokio::test]
    async fn tenant_same_engine_returned() {
        let tm = manager(test_data_dir("same_eng"));

        let eng1 = tm.get_or_create("foo").unwrap();
        let eng2 = tm.get_or_create("foo").unwrap();
        assert!(Arc::ptr_eq(&eng1, &eng2));
    }

    #[tokio::test]
    async fn tenant_policy_applied() {
        let options = TenantOptions {
            policy: BookingPolicy {
                reject_started_slots: true,
                walk_in_blocks: true,
            },
            ..TenantOptions::default()
        };
        let tm = TenantManager::new(test_data_dir("policy"), options);
        let engine = tm.get_or_create("strict").unwrap();
        assert_eq!(engine.policy(), options.policy);
    }

    #[tokio::test]
    async fn tenant_names_with_path_characters_refused() {
        let dir = test_data_dir("refuse_paths");
        let tm = manager(dir.clone());

        for name in ["../evil", "../..", "law.lib", "law/../lib", ""] {
            let err = tm.get_or_create(name).err().unwrap();
            assert_eq!(err.kind(), io::ErrorKind::InvalidInput, "{name:?}");
        }
        assert_eq!(tm.tenant_count(), 0);
        assert_eq!(fs::read_dir(&dir).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn similar_library_names_never_share_a_wal() {
        let dir = test_data_dir("no_shared_wal");
        let tm = manager(dir.clone());
        let lawlib = tm.get_or_create("lawlib").unwrap();
        lawlib.create_seat("ONLY_IN_LAWLIB", PhysicalStatus::Empty).await.unwrap();
        let law_lib = tm.get_or_create("law_lib").unwrap();
        assert_eq!(law_lib.seat_count(), 0);

        let reloaded = manager(dir);
        assert!(reloaded.get_or_create("law.lib").is_err());
        assert_eq!(reloaded.get_or_create("law_lib").unwrap().seat_count(), 0);
        assert_eq!(reloaded.get_or_create("lawlib").unwrap().seat_count(), 1);
    }

    #[test]
    fn wal_stem_is_the_library_name() {
        assert_eq!(wal_file_stem("main-library_2").unwrap(), "main-library_2");
        assert!(wal_file_stem("law/../library").is_err());
        assert!(wal_file_stem("bibliothèque").is_err());
        assert!(wal_file_stem("").is_err());
    }

    #[tokio::test]
    async fn tenant_name_too_long() {
        let tm = manager(test_data_dir("name_too_long"));

        let long_name = "x".repeat(MAX_TENANT_NAME_LEN + 1);
        let err = tm.get_or_create(&long_name).err().unwrap();
        assert!(err.to_string().contains("library name too long"));
    }

    #[tokio::test]
    async fn tenant_count_limit() {
        let tm = manager(test_data_dir("count_limit"));

        for i in 0..MAX_TENANTS {
            tm.get_or_create(&format!("t{i}")).unwrap();
        }
        let err = tm.get_or_create("one_more").err().unwrap();
        assert!(err.to_string().contains("too many libraries"));
    }
}
