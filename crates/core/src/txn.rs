//! Transactions over the registry.
//!
//! A [`Txn`] is the scope of one public operation. It resolves the caller's
//! handle or the target table's name, checks the caller context, and holds
//! the registry lock with a recursion count so helpers can lock and unlock
//! around work that must run unlocked (file I/O, validation functions).
//! Events, notifications and critical-table saves are queued on the
//! transaction and carried out by the caller after [`Txn::finish`].

use bitflags::bitflags;
use flight_tables_types::{RegId, TableHandle};
use parking_lot::{Mutex, MutexGuard};
use smallvec::SmallVec;

use crate::app::AppId;
use crate::error::{InvalidHandleSnafu, InvalidNameSnafu, NoAccessSnafu, Result, internal};
use crate::events::{DeferredEvent, EventId};
use crate::notify::PendingNotification;
use crate::registry::{Registry, RegistryRecord};

/// Events queued per transaction; later ones are dropped.
pub(crate) const MAX_EVENTS_PER_TXN: usize = 8;

bitflags! {
    /// Relationship between the caller and the target table.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) struct CallerContext: u8 {
        const TABLE_SERVICES = 0x01;
        const OWNER_APP = 0x02;
        const ACCESSOR_APP = 0x04;
        const OTHER_APP = 0x08;
    }
}

impl CallerContext {
    pub(crate) const ANY_APP: Self = Self::OWNER_APP.union(Self::ACCESSOR_APP);
}

pub(crate) struct Txn<'a> {
    lock: &'a Mutex<Registry>,
    guard: Option<MutexGuard<'a, Registry>>,
    lock_count: u32,
    pub caller: AppId,
    pub context: CallerContext,
    pub handle: Option<TableHandle>,
    pub reg_index: Option<usize>,
    pub reg_id: Option<RegId>,
    pub desc_index: Option<usize>,
    pub table_name: String,
    events: SmallVec<[DeferredEvent; MAX_EVENTS_PER_TXN]>,
    notifications: SmallVec<[PendingNotification; 1]>,
    critical_saves: SmallVec<[RegId; 1]>,
}

impl<'a> Txn<'a> {
    /// Bare transaction; the registry is not locked.
    pub fn init(lock: &'a Mutex<Registry>, caller: AppId) -> Self {
        Self {
            lock,
            guard: None,
            lock_count: 0,
            caller,
            context: if caller == AppId::TABLE_SERVICES {
                CallerContext::TABLE_SERVICES
            } else {
                CallerContext::OTHER_APP
            },
            handle: None,
            reg_index: None,
            reg_id: None,
            desc_index: None,
            table_name: String::new(),
            events: SmallVec::new(),
            notifications: SmallVec::new(),
            critical_saves: SmallVec::new(),
        }
    }

    /// Resolves `handle`, checks the caller against `allowed` and locks.
    ///
    /// The handle must belong to the caller unless the caller is table services.
    pub fn start_from_handle(&mut self, handle: TableHandle, allowed: CallerContext) -> Result<()> {
        self.lock_registry();
        let caller = self.caller;
        let reg = self.reg()?;
        let Some(desc_index) = reg.descriptor_index(handle) else {
            return InvalidHandleSnafu { handle: handle.value() }.fail();
        };
        let descriptor = &reg.descriptors[desc_index];
        let reg_index = descriptor.reg_index;
        let holder = descriptor.app;
        let record = &reg.records[reg_index];
        let name = record.config.name.clone();
        let reg_id = record.reg_id;
        let context = classify(caller, record, true);
        self.table_name = name.clone();
        if caller != AppId::TABLE_SERVICES && holder != caller {
            return NoAccessSnafu { table: name }.fail();
        }
        self.handle = Some(handle);
        self.desc_index = Some(desc_index);
        self.reg_index = Some(reg_index);
        self.reg_id = reg_id;
        self.context = context;
        if !allowed.intersects(context) {
            return NoAccessSnafu { table: name }.fail();
        }
        Ok(())
    }

    /// Resolves the table called `name`, checks the caller and locks.
    pub fn start_from_name(&mut self, name: &str, allowed: CallerContext) -> Result<()> {
        self.lock_registry();
        self.table_name = name.to_string();
        let caller = self.caller;
        let reg = self.reg()?;
        let Some(reg_index) = reg.locate_by_name(name) else {
            return InvalidNameSnafu { name }.fail();
        };
        let has_handle = reg.handle_of(reg_index, caller).is_some();
        let record = &reg.records[reg_index];
        let context = classify(caller, record, has_handle);
        let reg_id = record.reg_id;
        self.reg_id = reg_id;
        self.reg_index = Some(reg_index);
        self.context = context;
        if !allowed.intersects(context) {
            return NoAccessSnafu { table: name }.fail();
        }
        Ok(())
    }

    pub fn lock_registry(&mut self) {
        if self.lock_count == 0 {
            self.guard = Some(self.lock.lock());
        }
        self.lock_count += 1;
    }

    pub fn unlock_registry(&mut self) {
        match self.lock_count {
            0 => {},
            1 => {
                self.lock_count = 0;
                self.guard = None;
            },
            _ => self.lock_count -= 1,
        }
    }

    /// Drops every remaining hold on the registry lock.
    ///
    /// Queued events, notifications and saves survive for the caller to drain.
    pub fn finish(&mut self) {
        self.lock_count = 0;
        self.guard = None;
    }

    pub fn is_locked(&self) -> bool {
        self.guard.is_some()
    }

    /// The locked registry.
    pub fn reg(&mut self) -> Result<&mut Registry> {
        self.guard.as_deref_mut().ok_or_else(|| internal("registry accessed without holding its lock"))
    }

    /// Slot index of the resolved table.
    pub fn reg_index(&self) -> Result<usize> {
        self.reg_index.ok_or_else(|| internal("transaction has no table"))
    }

    /// Slot index of the resolved descriptor.
    pub fn desc_index(&self) -> Result<usize> {
        self.desc_index.ok_or_else(|| internal("transaction has no descriptor"))
    }

    /// Resolved record, confirmed to still carry the id seen at start.
    pub fn record(&mut self) -> Result<&mut RegistryRecord> {
        let reg_index = self.reg_index()?;
        let reg_id = self.reg_id;
        let reg = self.reg()?;
        let record = &mut reg.records[reg_index];
        if record.reg_id.is_none() || record.reg_id != reg_id {
            return Err(internal("registry record changed under the transaction"));
        }
        Ok(record)
    }

    pub fn add_event(&mut self, id: EventId, d1: i64, d2: i64) {
        if self.events.len() < MAX_EVENTS_PER_TXN {
            self.events.push(DeferredEvent { id, data: [d1, d2] });
        }
    }

    pub fn notify(&mut self, notification: PendingNotification) {
        self.notifications.push(notification);
    }

    pub fn schedule_critical_save(&mut self, reg_id: RegId) {
        if !self.critical_saves.contains(&reg_id) {
            self.critical_saves.push(reg_id);
        }
    }

    pub fn take_events(&mut self) -> SmallVec<[DeferredEvent; MAX_EVENTS_PER_TXN]> {
        std::mem::take(&mut self.events)
    }

    pub fn take_notifications(&mut self) -> SmallVec<[PendingNotification; 1]> {
        std::mem::take(&mut self.notifications)
    }

    pub fn take_critical_saves(&mut self) -> SmallVec<[RegId; 1]> {
        std::mem::take(&mut self.critical_saves)
    }
}

fn classify(caller: AppId, record: &RegistryRecord, has_handle: bool) -> CallerContext {
    if caller == AppId::TABLE_SERVICES {
        CallerContext::TABLE_SERVICES
    } else if record.owner == Some(caller) {
        CallerContext::OWNER_APP
    } else if has_handle {
        CallerContext::ACCESSOR_APP
    } else {
        CallerContext::OTHER_APP
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use flight_tables_types::TableServicesConfig;

    use super::*;
    use crate::error::TableError;

    fn setup() -> (Mutex<Registry>, TableHandle, TableHandle) {
        let mut reg = Registry::new(&TableServicesConfig::default());
        let r = reg.alloc_next().unwrap();
        reg.records[r].config.name = "NAV.Gains".into();
        reg.records[r].owner = Some(AppId::from_index(1));
        let owner = reg.alloc_descriptor(AppId::from_index(1), r).unwrap();
        reg.link_descriptor(owner);
        let reader = reg.alloc_descriptor(AppId::from_index(2), r).unwrap();
        reg.link_descriptor(reader);
        (Mutex::new(reg), owner, reader)
    }

    #[test]
    fn test_owner_and_accessor_contexts() {
        let (lock, owner, reader) = setup();
        let mut txn = Txn::init(&lock, AppId::from_index(1));
        txn.start_from_handle(owner, CallerContext::OWNER_APP).unwrap();
        assert_eq!(txn.context, CallerContext::OWNER_APP);
        txn.finish();

        let mut txn = Txn::init(&lock, AppId::from_index(2));
        let err = txn.start_from_handle(reader, CallerContext::OWNER_APP).unwrap_err();
        assert!(matches!(err, TableError::NoAccess { .. }));
        assert_eq!(txn.context, CallerContext::ACCESSOR_APP);
        txn.finish();
        assert!(!lock.is_locked());
    }

    #[test]
    fn test_foreign_handle_rejected() {
        let (lock, owner, _) = setup();
        let mut txn = Txn::init(&lock, AppId::from_index(2));
        let err = txn.start_from_handle(owner, CallerContext::ANY_APP).unwrap_err();
        assert!(matches!(err, TableError::NoAccess { .. }));

        txn.finish();
        let mut ts = Txn::init(&lock, AppId::TABLE_SERVICES);
        ts.start_from_handle(owner, CallerContext::TABLE_SERVICES).unwrap();
        assert_eq!(ts.table_name, "NAV.Gains");
    }

    #[test]
    fn test_unknown_name() {
        let (lock, _, _) = setup();
        let mut txn = Txn::init(&lock, AppId::TABLE_SERVICES);
        let err = txn.start_from_name("NAV.Missing", CallerContext::TABLE_SERVICES).unwrap_err();
        assert!(matches!(err, TableError::InvalidName { .. }));
    }

    #[test]
    fn test_recursive_lock_count() {
        let (lock, _, _) = setup();
        let mut txn = Txn::init(&lock, AppId::TABLE_SERVICES);
        txn.lock_registry();
        txn.lock_registry();
        txn.unlock_registry();
        assert!(txn.is_locked());
        txn.unlock_registry();
        assert!(!txn.is_locked());
        assert!(txn.reg().is_err());
        txn.lock_registry();
        txn.finish();
        assert!(!lock.is_locked());
    }

    #[test]
    fn test_event_queue_is_bounded() {
        let (lock, _, _) = setup();
        let mut txn = Txn::init(&lock, AppId::TABLE_SERVICES);
        for i in 0..12 {
            txn.add_event(EventId::LoadError, i, 0);
        }
        let events = txn.take_events();
        assert_eq!(events.len(), MAX_EVENTS_PER_TXN);
        assert_eq!(events[7].data[0], 7);
    }
}
