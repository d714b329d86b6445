//! Bounded, lazily grown set of connections with least-busy selection.

use std::sync::Arc;

use crate::connection::Connection;
use crate::driver::Driver;
use crate::metrics::Stats;

/// Index of the least loaded connection: minimal depth, lowest index on ties.
pub fn least_busy_index(depths: &[usize]) -> Option<usize> {
    depths
        .iter()
        .enumerate()
        .min_by_key(|&(index, &depth)| (depth, index))
        .map(|(index, _)| index)
}

pub struct ConnectionPool {
    driver: Arc<dyn Driver>,
    connection: Arc<str>,
    max_connections: usize,
    connections: Vec<Connection>,
    stats: Arc<Stats>,
}

impl ConnectionPool {
    pub fn new(
        driver: Arc<dyn Driver>,
        connection: &str,
        max_connections: usize,
        stats: Arc<Stats>,
    ) -> Self {
        Self {
            driver,
            connection: Arc::from(connection),
            max_connections: max_connections.max(1),
            connections: Vec::new(),
            stats,
        }
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    /// Connections opened so far.
    pub fn open_connections(&self) -> usize {
        self.connections.len()
    }

    /// Instantaneous queue depth of every connection, by index.
    pub fn depths(&self) -> Vec<usize> {
        self.connections.iter().map(Connection::depth).collect()
    }

    pub fn get(&self, index: usize) -> Option<&Connection> {
        self.connections.get(index)
    }

    /// Open connections until `count` exist (capped at the maximum).
    pub fn prewarm(&mut self, count: usize) {
        while self.connections.len() < count.min(self.max_connections) {
            self.open();
        }
    }

    /// The connection new work should go to.
    ///
    /// Below capacity this opens a fresh connection, which starts idle.
    /// At capacity it picks by [`least_busy_index`].
    pub fn least_busy(&mut self) -> &Connection {
        if self.connections.len() < self.max_connections {
            return self.open();
        }
        let index = least_busy_index(&self.depths()).unwrap_or(0);
        &self.connections[index]
    }

    fn open(&mut self) -> &Connection {
        let index = self.connections.len();
        tracing::debug!(connection = index, max = self.max_connections, "opening connection");
        let conn = Connection::open(
            index,
            Arc::clone(&self.driver),
            Arc::clone(&self.connection),
        );
        self.stats.record_connection();
        self.connections.push(conn);
        &self.connections[index]
    }

    /// Close every connection, letting queued statements finish first.
    pub async fn close(&mut self) {
        for conn in &mut self.connections {
            conn.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryDriver;
    use std::time::Duration;

    #[test]
    fn comparator_prefers_lowest_index_on_ties() {
        assert_eq!(least_busy_index(&[]), None);
        assert_eq!(least_busy_index(&[3, 1, 1, 2]), Some(1));
        assert_eq!(least_busy_index(&[0, 0, 0]), Some(0));
        assert_eq!(least_busy_index(&[5, 4, 3, 3]), Some(2));
    }

    fn pool(driver: &MemoryDriver, max: usize) -> ConnectionPool {
        ConnectionPool::new(
            Arc::new(driver.clone()),
            "memory",
            max,
            Arc::new(Stats::default()),
        )
    }

    #[tokio::test]
    async fn grows_until_capacity_then_balances() {
        let driver = MemoryDriver::new().with_delay(Duration::from_secs(60));
        let mut pool = pool(&driver, 2);

        assert_eq!(pool.least_busy().index(), 0);
        assert_eq!(pool.least_busy().index(), 1);
        assert_eq!(pool.open_connections(), 2);

        // Both idle: lowest index wins.
        let conn = pool.least_busy();
        assert_eq!(conn.index(), 0);
        conn.enqueue("select 1 as r".into(), Box::new(|_| {}));

        assert_eq!(pool.least_busy().index(), 1);
        pool.get(1)
            .unwrap()
            .enqueue("select 1 as r".into(), Box::new(|_| {}));
        pool.get(1)
            .unwrap()
            .enqueue("select 1 as r".into(), Box::new(|_| {}));

        assert_eq!(pool.depths(), vec![1, 2]);
        assert_eq!(pool.least_busy().index(), 0);
        assert_eq!(pool.open_connections(), 2);
    }

    #[tokio::test]
    async fn prewarm_respects_the_cap() {
        let driver = MemoryDriver::new();
        let mut pool = pool(&driver, 3);
        pool.prewarm(10);
        assert_eq!(pool.open_connections(), 3);
        pool.close().await;
        assert_eq!(driver.connect_count(), 3);
    }
}
