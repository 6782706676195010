//! Connection registry: the authoritative map of live connections.
//!
//! All state lives behind one async mutex. Every mutation (`add`, `remove`,
//! `set_name`, liveness transitions) and every roster snapshot takes that lock,
//! so the name-uniqueness invariant is never observed mid-update and a removal
//! can never interleave with a broadcast iteration.
//!
//! Entries are keyed by `ConnectionId`. Ids come from a monotonically
//! increasing counter, so iterating the `BTreeMap` yields insertion order.

use std::{
    collections::BTreeMap,
    net::IpAddr,
    sync::Arc,
    time::Duration,
};

use charla_shared::time::Clock;
use tokio::sync::Mutex;

use crate::domain::{ConnectionId, RegistryError, Timestamp, Username};

use super::transport::TransportHandle;

/// One live connection.
#[derive(Debug)]
struct Connection {
    /// Exclusively owned; dropping the entry closes the socket
    handle: TransportHandle,
    /// `None` until join; immutable afterwards
    name: Option<Username>,
    remote_address: Option<IpAddr>,
    connected_at: Timestamp,
    last_activity_at: Timestamp,
    /// Liveness probe state
    alive: bool,
}

#[derive(Debug, Default)]
struct Inner {
    next_id: u64,
    connections: BTreeMap<ConnectionId, Connection>,
}

/// Roster entry of a named connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserSnapshot {
    pub username: Username,
    pub connected_at: Timestamp,
}

/// A connection that was removed from the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Departed {
    pub id: ConnectionId,
    pub username: Option<Username>,
}

/// Aggregate outcome of a broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub succeeded: usize,
    pub failed: usize,
}

/// Outcome of one liveness probe cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeReport {
    /// Connections that were sent a fresh probe
    pub probed: usize,
    /// Connections that missed the previous probe and were force-closed
    pub evicted: Vec<ConnectionId>,
}

pub struct ConnectionRegistry {
    inner: Mutex<Inner>,
    clock: Arc<dyn Clock>,
}

impl ConnectionRegistry {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            clock,
        }
    }

    fn now(&self) -> Timestamp {
        Timestamp::new(self.clock.now_millis())
    }

    /// Register a freshly accepted transport and return its new id.
    pub async fn add(&self, handle: TransportHandle, remote_address: Option<IpAddr>) -> ConnectionId {
        let now = self.now();
        let mut inner = self.inner.lock().await;
        inner.next_id += 1;
        let id = ConnectionId::new(inner.next_id);
        inner.connections.insert(
            id,
            Connection {
                handle,
                name: None,
                remote_address,
                connected_at: now,
                last_activity_at: now,
                alive: true,
            },
        );
        tracing::debug!(connection_id = %id, "connection registered");
        id
    }

    /// Remove a connection. Removing an unknown id is a no-op.
    pub async fn remove(&self, id: ConnectionId) -> Option<Departed> {
        let mut inner = self.inner.lock().await;
        let removed = inner.connections.remove(&id)?;
        tracing::debug!(connection_id = %id, "connection removed");
        Some(Departed {
            id,
            username: removed.name,
        })
    }

    /// Assign a display name, enforcing uniqueness among active connections.
    pub async fn set_name(&self, id: ConnectionId, name: Username) -> Result<(), RegistryError> {
        let mut inner = self.inner.lock().await;
        let taken = inner
            .connections
            .iter()
            .any(|(other, conn)| *other != id && conn.name.as_ref() == Some(&name));
        if taken {
            return Err(RegistryError::NameTaken(name.into_string()));
        }
        let conn = inner
            .connections
            .get_mut(&id)
            .ok_or(RegistryError::NotFound(id))?;
        conn.name = Some(name);
        Ok(())
    }

    pub async fn is_name_taken(&self, name: &str) -> bool {
        self.find_by_name(name).await.is_some()
    }

    pub async fn find_by_name(&self, name: &str) -> Option<ConnectionId> {
        let inner = self.inner.lock().await;
        inner
            .connections
            .iter()
            .find(|(_, conn)| conn.name.as_ref().is_some_and(|n| n.as_str() == name))
            .map(|(id, _)| *id)
    }

    pub async fn name_of(&self, id: ConnectionId) -> Option<Username> {
        let inner = self.inner.lock().await;
        inner.connections.get(&id).and_then(|conn| conn.name.clone())
    }

    pub async fn remote_address_of(&self, id: ConnectionId) -> Option<IpAddr> {
        let inner = self.inner.lock().await;
        inner.connections.get(&id).and_then(|conn| conn.remote_address)
    }

    pub async fn contains(&self, id: ConnectionId) -> bool {
        self.inner.lock().await.connections.contains_key(&id)
    }

    pub async fn count(&self) -> usize {
        self.inner.lock().await.connections.len()
    }

    /// Snapshot of named connections in insertion order.
    pub async fn list_active_users(&self) -> Vec<UserSnapshot> {
        let inner = self.inner.lock().await;
        inner
            .connections
            .values()
            .filter_map(|conn| {
                conn.name.as_ref().map(|name| UserSnapshot {
                    username: name.clone(),
                    connected_at: conn.connected_at,
                })
            })
            .collect()
    }

    /// Record inbound activity.
    pub async fn touch(&self, id: ConnectionId) {
        let now = self.now();
        let mut inner = self.inner.lock().await;
        if let Some(conn) = inner.connections.get_mut(&id) {
            conn.last_activity_at = now;
        }
    }

    /// Best-effort unicast.
    pub async fn send_to(&self, id: ConnectionId, payload: &str) -> bool {
        let inner = self.inner.lock().await;
        match inner.connections.get(&id) {
            Some(conn) if conn.handle.is_writable() => conn.handle.send_text(payload),
            _ => false,
        }
    }

    /// Best-effort fan-out to every connection except `exclude`.
    pub async fn broadcast(&self, payload: &str, exclude: Option<ConnectionId>) -> BroadcastReport {
        let inner = self.inner.lock().await;
        let mut report = BroadcastReport::default();
        for (id, conn) in inner.connections.iter() {
            if Some(*id) == exclude {
                continue;
            }
            if conn.handle.is_writable() && conn.handle.send_text(payload) {
                report.succeeded += 1;
            } else {
                tracing::warn!(connection_id = %id, "failed to deliver broadcast");
                report.failed += 1;
            }
        }
        report
    }

    /// Remove connections whose transport is closed or that have been silent
    /// for longer than `inactivity_timeout`.
    pub async fn sweep_stale(&self, inactivity_timeout: Duration) -> usize {
        let now = self.now();
        let timeout = i64::try_from(inactivity_timeout.as_millis()).unwrap_or(i64::MAX);
        let mut inner = self.inner.lock().await;
        let before = inner.connections.len();
        inner.connections.retain(|id, conn| {
            let idle = now.value() - conn.last_activity_at.value();
            let stale = !conn.handle.is_writable() || idle > timeout;
            if stale {
                tracing::info!(connection_id = %id, idle_ms = idle, "sweeping stale connection");
                conn.handle.terminate();
            }
            !stale
        });
        before - inner.connections.len()
    }

    /// Probe-ack transition: the connection answered the last probe.
    pub async fn mark_alive(&self, id: ConnectionId) {
        let mut inner = self.inner.lock().await;
        if let Some(conn) = inner.connections.get_mut(&id) {
            conn.alive = true;
        }
    }

    /// Probe-sent transition for every open connection.
    ///
    /// A connection that has not acknowledged the previous probe is
    /// force-terminated; its transport's close path removes the entry.
    pub async fn probe_all(&self) -> ProbeReport {
        let mut inner = self.inner.lock().await;
        let mut report = ProbeReport::default();
        for (id, conn) in inner.connections.iter_mut() {
            if !conn.handle.is_writable() {
                continue;
            }
            if !conn.alive {
                conn.handle.terminate();
                report.evicted.push(*id);
                continue;
            }
            conn.alive = false;
            if conn.handle.send_probe() {
                report.probed += 1;
            }
        }
        report
    }

    /// Ask every connection to close with the given code.
    pub async fn close_all(&self, code: u16, reason: &str) -> usize {
        let inner = self.inner.lock().await;
        inner
            .connections
            .values()
            .filter(|conn| conn.handle.close(code, reason))
            .count()
    }

    /// Force-terminate and drop every remaining connection.
    pub async fn terminate_all(&self) -> usize {
        let mut inner = self.inner.lock().await;
        for conn in inner.connections.values() {
            conn.handle.terminate();
        }
        let count = inner.connections.len();
        inner.connections.clear();
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::transport::{OutboundFrame, TransportReceiver};
    use crate::test_support::MockTestClock;
    use charla_shared::time::{FixedClock, ManualClock};

    fn create_test_registry() -> ConnectionRegistry {
        ConnectionRegistry::new(Arc::new(FixedClock::new(1_000)))
    }

    async fn connect(registry: &ConnectionRegistry) -> (ConnectionId, TransportReceiver) {
        let (handle, receiver) = TransportHandle::channel();
        let id = registry.add(handle, None).await;
        (id, receiver)
    }

    fn name(raw: &str) -> Username {
        Username::new(raw).unwrap()
    }

    fn drain_texts(receiver: &mut TransportReceiver) -> Vec<String> {
        let mut texts = Vec::new();
        while let Ok(frame) = receiver.outbound.try_recv() {
            if let OutboundFrame::Text(text) = frame {
                texts.push(text);
            }
        }
        texts
    }

    #[tokio::test]
    async fn test_add_allocates_unique_increasing_ids() {
        // テスト項目: add は毎回新しい一意な ID を払い出す
        // given (前提条件):
        let registry = create_test_registry();

        // when (操作):
        let (a, _ra) = connect(&registry).await;
        let (b, _rb) = connect(&registry).await;
        registry.remove(a).await;
        let (c, _rc) = connect(&registry).await;

        // then (期待する結果):
        assert!(a < b && b < c);
        assert_eq!(registry.count().await, 2);
    }

    #[tokio::test]
    async fn test_add_reads_clock_for_connected_at() {
        // テスト項目: 接続時刻は Clock から取得される
        // given (前提条件):
        let mut clock = MockTestClock::new();
        clock.expect_now_millis().times(1).return_const(42_000i64);
        let registry = ConnectionRegistry::new(Arc::new(clock));
        let (handle, _receiver) = TransportHandle::channel();

        // when (操作):
        let id = registry.add(handle, None).await;
        registry.set_name(id, name("Ana")).await.unwrap();
        let users = registry.list_active_users().await;

        // then (期待する結果):
        assert_eq!(users[0].connected_at, Timestamp::new(42_000));
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        // テスト項目: 同じ ID を 2 回削除しても、未知の ID を削除してもエラーにならない
        // given (前提条件):
        let registry = create_test_registry();
        let (id, _receiver) = connect(&registry).await;

        // when (操作):
        let first = registry.remove(id).await;
        let second = registry.remove(id).await;
        let unknown = registry.remove(ConnectionId::new(999)).await;

        // then (期待する結果):
        assert_eq!(
            first,
            Some(Departed {
                id,
                username: None
            })
        );
        assert_eq!(second, None);
        assert_eq!(unknown, None);
        assert_eq!(registry.count().await, 0);
    }

    #[tokio::test]
    async fn test_remove_closes_transport() {
        // テスト項目: エントリを削除するとトランスポートが閉じられる
        // given (前提条件):
        let registry = create_test_registry();
        let (id, mut receiver) = connect(&registry).await;

        // when (操作):
        registry.remove(id).await;

        // then (期待する結果):
        assert_eq!(receiver.outbound.recv().await, None);
    }

    #[tokio::test]
    async fn test_set_name_rejects_duplicate() {
        // テスト項目: 他の接続が使用中の名前は設定できない（大文字小文字は区別する）
        // given (前提条件):
        let registry = create_test_registry();
        let (a, _ra) = connect(&registry).await;
        let (b, _rb) = connect(&registry).await;
        registry.set_name(a, name("Ana")).await.unwrap();

        // when (操作):
        let duplicate = registry.set_name(b, name("Ana")).await;
        let other_case = registry.set_name(b, name("ana")).await;

        // then (期待する結果):
        assert_eq!(duplicate, Err(RegistryError::NameTaken("Ana".to_string())));
        assert!(other_case.is_ok());
        assert_eq!(registry.find_by_name("Ana").await, Some(a));
        assert_eq!(registry.find_by_name("ana").await, Some(b));
    }

    #[tokio::test]
    async fn test_set_name_unknown_connection() {
        // テスト項目: 存在しない接続への名前設定は NotFound になる
        // given (前提条件):
        let registry = create_test_registry();
        let ghost = ConnectionId::new(77);

        // when (操作):
        let result = registry.set_name(ghost, name("Ana")).await;

        // then (期待する結果):
        assert_eq!(result, Err(RegistryError::NotFound(ghost)));
    }

    #[tokio::test]
    async fn test_name_is_released_on_remove() {
        // テスト項目: 切断した接続の名前は再び使用可能になる
        // given (前提条件):
        let registry = create_test_registry();
        let (a, _ra) = connect(&registry).await;
        let (b, _rb) = connect(&registry).await;
        registry.set_name(a, name("Ana")).await.unwrap();

        // when (操作):
        registry.remove(a).await;
        let result = registry.set_name(b, name("Ana")).await;

        // then (期待する結果):
        assert!(result.is_ok());
        assert!(registry.is_name_taken("Ana").await);
    }

    #[tokio::test]
    async fn test_concurrent_set_name_only_one_wins() {
        // テスト項目: 同じ名前への同時 join は 1 つだけ成功する
        // given (前提条件):
        let registry = Arc::new(create_test_registry());
        let mut receivers = Vec::new();
        let mut ids = Vec::new();
        for _ in 0..16 {
            let (id, receiver) = connect(&registry).await;
            ids.push(id);
            receivers.push(receiver);
        }

        // when (操作):
        let tasks: Vec<_> = ids
            .into_iter()
            .map(|id| {
                let registry = registry.clone();
                tokio::spawn(async move { registry.set_name(id, name("Ana")).await })
            })
            .collect();
        let mut successes = 0;
        for task in tasks {
            if task.await.unwrap().is_ok() {
                successes += 1;
            }
        }

        // then (期待する結果):
        assert_eq!(successes, 1);
        assert_eq!(registry.list_active_users().await.len(), 1);
    }

    #[tokio::test]
    async fn test_list_active_users_in_insertion_order() {
        // テスト項目: 参加者一覧は名前順ではなく接続順で返され、未参加の接続は含まれない
        // given (前提条件):
        let registry = create_test_registry();
        let (a, _ra) = connect(&registry).await;
        let (_anonymous, _rx) = connect(&registry).await;
        let (c, _rc) = connect(&registry).await;
        registry.set_name(c, name("Bruno")).await.unwrap();
        registry.set_name(a, name("Zoe")).await.unwrap();

        // when (操作):
        let users = registry.list_active_users().await;

        // then (期待する結果):
        let names: Vec<&str> = users.iter().map(|u| u.username.as_str()).collect();
        assert_eq!(names, vec!["Zoe", "Bruno"]);
    }

    #[tokio::test]
    async fn test_send_to_is_best_effort() {
        // テスト項目: send_to は未知の ID や閉じたトランスポートに対して false を返す
        // given (前提条件):
        let registry = create_test_registry();
        let (open, mut open_rx) = connect(&registry).await;
        let (closed, closed_rx) = connect(&registry).await;
        drop(closed_rx);

        // when (操作):
        let to_open = registry.send_to(open, "hola").await;
        let to_closed = registry.send_to(closed, "hola").await;
        let to_unknown = registry.send_to(ConnectionId::new(999), "hola").await;

        // then (期待する結果):
        assert!(to_open);
        assert!(!to_closed);
        assert!(!to_unknown);
        assert_eq!(drain_texts(&mut open_rx), vec!["hola".to_string()]);
    }

    #[tokio::test]
    async fn test_broadcast_counts_and_exclusion() {
        // テスト項目: 一部の送信失敗があっても残りへの配信は継続され、集計が返る
        // given (前提条件):
        let registry = create_test_registry();
        let (a, mut ra) = connect(&registry).await;
        let (_b, rb) = connect(&registry).await;
        let (_c, mut rc) = connect(&registry).await;
        let (_d, mut rd) = connect(&registry).await;
        drop(rb);

        // when (操作):
        let report = registry.broadcast("evento", Some(a)).await;

        // then (期待する結果):
        assert_eq!(
            report,
            BroadcastReport {
                succeeded: 2,
                failed: 1
            }
        );
        assert!(drain_texts(&mut ra).is_empty());
        assert_eq!(drain_texts(&mut rc), vec!["evento".to_string()]);
        assert_eq!(drain_texts(&mut rd), vec!["evento".to_string()]);
    }

    #[tokio::test]
    async fn test_sweep_stale_removes_idle_and_closed() {
        // テスト項目: 非アクティブ時間を超えた接続と閉じた接続が掃除される
        // given (前提条件):
        let clock = Arc::new(ManualClock::new(0));
        let registry = ConnectionRegistry::new(clock.clone());
        let (idle, _ri) = connect(&registry).await;
        let (active, _ra) = connect(&registry).await;
        let (closed, rc) = connect(&registry).await;
        drop(rc);

        // when (操作):
        clock.advance(Duration::from_secs(301));
        registry.touch(active).await;
        let removed = registry.sweep_stale(Duration::from_secs(300)).await;

        // then (期待する結果):
        assert_eq!(removed, 2);
        assert!(!registry.contains(idle).await);
        assert!(!registry.contains(closed).await);
        assert!(registry.contains(active).await);
    }

    #[tokio::test]
    async fn test_sweep_stale_keeps_connection_at_exact_timeout() {
        // テスト項目: 非アクティブ時間がちょうどタイムアウトと等しい接続は残る
        // given (前提条件):
        let clock = Arc::new(ManualClock::new(0));
        let registry = ConnectionRegistry::new(clock.clone());
        let (id, _receiver) = connect(&registry).await;

        // when (操作):
        clock.advance(Duration::from_secs(300));
        let removed = registry.sweep_stale(Duration::from_secs(300)).await;

        // then (期待する結果):
        assert_eq!(removed, 0);
        assert!(registry.contains(id).await);
    }

    #[tokio::test]
    async fn test_probe_cycle_evicts_unacknowledged() {
        // テスト項目: 前回のプローブに応答しなかった接続は次のサイクルで強制切断される
        // given (前提条件):
        let registry = create_test_registry();
        let (responsive, mut rr) = connect(&registry).await;
        let (silent, rs) = connect(&registry).await;

        // when (操作):
        let first = registry.probe_all().await;
        registry.mark_alive(responsive).await;
        let second = registry.probe_all().await;

        // then (期待する結果):
        assert_eq!(first.probed, 2);
        assert!(first.evicted.is_empty());
        assert_eq!(second.probed, 1);
        assert_eq!(second.evicted, vec![silent]);
        assert_eq!(rr.outbound.try_recv(), Ok(OutboundFrame::Probe));
        assert!(
            tokio::time::timeout(Duration::from_secs(1), rs.terminated())
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_close_all_and_terminate_all() {
        // テスト項目: close_all は全接続にクローズフレームを送り、terminate_all は全エントリを破棄する
        // given (前提条件):
        let registry = create_test_registry();
        let (_a, mut ra) = connect(&registry).await;
        let (_b, _rb) = connect(&registry).await;

        // when (操作):
        let closed = registry.close_all(1000, "shutdown").await;
        let terminated = registry.terminate_all().await;

        // then (期待する結果):
        assert_eq!(closed, 2);
        assert_eq!(terminated, 2);
        assert_eq!(registry.count().await, 0);
        assert_eq!(
            ra.outbound.recv().await,
            Some(OutboundFrame::Close {
                code: 1000,
                reason: "shutdown".to_string()
            })
        );
    }
}
