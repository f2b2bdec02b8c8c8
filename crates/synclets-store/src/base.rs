//! Base adapters: data connectors over small, domain-shaped backends.
//!
//! Most stores do not think in terms of addresses. A key/value store holds
//! named values, a spreadsheet holds rows of cells. Each adapter here fixes
//! the tree depth and translates addresses into the backend's own vocabulary:
//!
//! | Adapter | Depth | Leaf address |
//! |---------|-------|--------------|
//! | [`ValueConnector`] | 0 | `[]` |
//! | [`ValuesConnector`] | 1 | `[value_id]` |
//! | [`TableConnector`] | 2 | `[row_id, cell_id]` |
//! | [`TablesConnector`] | 3 | `[table_id, row_id, cell_id]` |
//!
//! Backends report their own changes through `notify_changed` on the
//! adapter, which forwards them to the owning Synclet.

use async_trait::async_trait;

use synclets_core::{Address, Value};

use crate::error::{ConnectorError, Result};
use crate::traits::{Attachment, ChangeNotifier, ChangeSender, DataConnector};

/// A store holding one value.
pub trait ValueBackend: Send + Sync {
    fn read_value(&self) -> Result<Option<Value>>;
    fn write_value(&self, value: Value) -> Result<()>;
}

/// A store of named values.
pub trait ValuesBackend: Send + Sync {
    fn value_ids(&self) -> Result<Vec<String>>;
    fn read_value(&self, value_id: &str) -> Result<Option<Value>>;
    fn write_value(&self, value_id: &str, value: Value) -> Result<()>;
}

/// A single table of rows and cells.
pub trait TableBackend: Send + Sync {
    fn row_ids(&self) -> Result<Vec<String>>;
    fn cell_ids(&self, row_id: &str) -> Result<Vec<String>>;
    fn read_cell(&self, row_id: &str, cell_id: &str) -> Result<Option<Value>>;
    fn write_cell(&self, row_id: &str, cell_id: &str, value: Value) -> Result<()>;
}

/// A set of named tables.
pub trait TablesBackend: Send + Sync {
    fn table_ids(&self) -> Result<Vec<String>>;
    fn row_ids(&self, table_id: &str) -> Result<Vec<String>>;
    fn cell_ids(&self, table_id: &str, row_id: &str) -> Result<Vec<String>>;
    fn read_cell(&self, table_id: &str, row_id: &str, cell_id: &str) -> Result<Option<Value>>;
    fn write_cell(&self, table_id: &str, row_id: &str, cell_id: &str, value: Value) -> Result<()>;
}

fn invalid(address: &Address, depth: usize) -> ConnectorError {
    ConnectorError::InvalidAddress {
        address: address.clone(),
        depth,
    }
}

macro_rules! adapter {
    ($(#[$doc:meta])* $name:ident, $backend:ident, $depth:expr) => {
        $(#[$doc])*
        pub struct $name<B> {
            backend: B,
            attachment: Attachment,
            notifier: ChangeNotifier,
        }

        impl<B: $backend> $name<B> {
            pub const DEPTH: usize = $depth;

            pub fn new(backend: B) -> Self {
                Self {
                    backend,
                    attachment: Attachment::new(),
                    notifier: ChangeNotifier::default(),
                }
            }

            pub fn backend(&self) -> &B {
                &self.backend
            }

            /// Report a value the backend changed by itself.
            pub fn notify_changed(&self, address: Address) -> Result<()> {
                if address.len() != Self::DEPTH {
                    return Err(invalid(&address, Self::DEPTH));
                }
                self.notifier.notify(address)?;
                Ok(())
            }
        }
    };
}

adapter!(
    /// Depth-0 adapter: the root is the only leaf.
    ValueConnector,
    ValueBackend,
    0
);
adapter!(
    /// Depth-1 adapter over named values.
    ValuesConnector,
    ValuesBackend,
    1
);
adapter!(
    /// Depth-2 adapter over one table.
    TableConnector,
    TableBackend,
    2
);
adapter!(
    /// Depth-3 adapter over many tables.
    TablesConnector,
    TablesBackend,
    3
);

#[async_trait]
impl<B: ValueBackend> DataConnector for ValueConnector<B> {
    fn depth(&self) -> usize {
        Self::DEPTH
    }

    fn attachment(&self) -> &Attachment {
        &self.attachment
    }

    async fn connect(&self, changes: ChangeSender) -> Result<()> {
        self.notifier.register(changes)
    }

    async fn disconnect(&self) -> Result<()> {
        self.notifier.unregister()
    }

    async fn read_child_ids(&self, _address: &Address) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    async fn read_value(&self, address: &Address) -> Result<Option<Value>> {
        match address.ids() {
            [] => self.backend.read_value(),
            _ => Ok(None),
        }
    }

    async fn write_value(&self, address: &Address, value: &Value) -> Result<()> {
        match address.ids() {
            [] => self.backend.write_value(value.clone()),
            _ => Err(invalid(address, Self::DEPTH)),
        }
    }
}

#[async_trait]
impl<B: ValuesBackend> DataConnector for ValuesConnector<B> {
    fn depth(&self) -> usize {
        Self::DEPTH
    }

    fn attachment(&self) -> &Attachment {
        &self.attachment
    }

    async fn connect(&self, changes: ChangeSender) -> Result<()> {
        self.notifier.register(changes)
    }

    async fn disconnect(&self) -> Result<()> {
        self.notifier.unregister()
    }

    async fn read_child_ids(&self, address: &Address) -> Result<Vec<String>> {
        match address.ids() {
            [] => self.backend.value_ids(),
            _ => Ok(Vec::new()),
        }
    }

    async fn read_value(&self, address: &Address) -> Result<Option<Value>> {
        match address.ids() {
            [value_id] => self.backend.read_value(value_id),
            _ => Ok(None),
        }
    }

    async fn write_value(&self, address: &Address, value: &Value) -> Result<()> {
        match address.ids() {
            [value_id] => self.backend.write_value(value_id, value.clone()),
            _ => Err(invalid(address, Self::DEPTH)),
        }
    }
}

#[async_trait]
impl<B: TableBackend> DataConnector for TableConnector<B> {
    fn depth(&self) -> usize {
        Self::DEPTH
    }

    fn attachment(&self) -> &Attachment {
        &self.attachment
    }

    async fn connect(&self, changes: ChangeSender) -> Result<()> {
        self.notifier.register(changes)
    }

    async fn disconnect(&self) -> Result<()> {
        self.notifier.unregister()
    }

    async fn read_child_ids(&self, address: &Address) -> Result<Vec<String>> {
        match address.ids() {
            [] => self.backend.row_ids(),
            [row_id] => self.backend.cell_ids(row_id),
            _ => Ok(Vec::new()),
        }
    }

    async fn read_value(&self, address: &Address) -> Result<Option<Value>> {
        match address.ids() {
            [row_id, cell_id] => self.backend.read_cell(row_id, cell_id),
            _ => Ok(None),
        }
    }

    async fn write_value(&self, address: &Address, value: &Value) -> Result<()> {
        match address.ids() {
            [row_id, cell_id] => self.backend.write_cell(row_id, cell_id, value.clone()),
            _ => Err(invalid(address, Self::DEPTH)),
        }
    }
}

#[async_trait]
impl<B: TablesBackend> DataConnector for TablesConnector<B> {
    fn depth(&self) -> usize {
        Self::DEPTH
    }

    fn attachment(&self) -> &Attachment {
        &self.attachment
    }

    async fn connect(&self, changes: ChangeSender) -> Result<()> {
        self.notifier.register(changes)
    }

    async fn disconnect(&self) -> Result<()> {
        self.notifier.unregister()
    }

    async fn read_child_ids(&self, address: &Address) -> Result<Vec<String>> {
        match address.ids() {
            [] => self.backend.table_ids(),
            [table_id] => self.backend.row_ids(table_id),
            [table_id, row_id] => self.backend.cell_ids(table_id, row_id),
            _ => Ok(Vec::new()),
        }
    }

    async fn read_value(&self, address: &Address) -> Result<Option<Value>> {
        match address.ids() {
            [table_id, row_id, cell_id] => self.backend.read_cell(table_id, row_id, cell_id),
            _ => Ok(None),
        }
    }

    async fn write_value(&self, address: &Address, value: &Value) -> Result<()> {
        match address.ids() {
            [table_id, row_id, cell_id] => {
                self.backend.write_cell(table_id, row_id, cell_id, value.clone())
            }
            _ => Err(invalid(address, Self::DEPTH)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::RwLock;
    use tokio::sync::mpsc;

    #[derive(Default)]
    struct Cell(RwLock<Option<Value>>);

    impl ValueBackend for Cell {
        fn read_value(&self) -> Result<Option<Value>> {
            Ok(self.0.read()?.clone())
        }
        fn write_value(&self, value: Value) -> Result<()> {
            *self.0.write()? = Some(value);
            Ok(())
        }
    }

    #[derive(Default)]
    struct KeyValue(RwLock<BTreeMap<String, Value>>);

    impl ValuesBackend for KeyValue {
        fn value_ids(&self) -> Result<Vec<String>> {
            Ok(self.0.read()?.keys().cloned().collect())
        }
        fn read_value(&self, value_id: &str) -> Result<Option<Value>> {
            Ok(self.0.read()?.get(value_id).cloned())
        }
        fn write_value(&self, value_id: &str, value: Value) -> Result<()> {
            self.0.write()?.insert(value_id.to_string(), value);
            Ok(())
        }
    }

    type Rows = BTreeMap<String, BTreeMap<String, Value>>;

    #[derive(Default)]
    struct Sheet(RwLock<Rows>);

    impl TableBackend for Sheet {
        fn row_ids(&self) -> Result<Vec<String>> {
            Ok(self.0.read()?.keys().cloned().collect())
        }
        fn cell_ids(&self, row_id: &str) -> Result<Vec<String>> {
            Ok(self
                .0
                .read()?
                .get(row_id)
                .map(|row| row.keys().cloned().collect())
                .unwrap_or_default())
        }
        fn read_cell(&self, row_id: &str, cell_id: &str) -> Result<Option<Value>> {
            Ok(self.0.read()?.get(row_id).and_then(|row| row.get(cell_id)).cloned())
        }
        fn write_cell(&self, row_id: &str, cell_id: &str, value: Value) -> Result<()> {
            self.0
                .write()?
                .entry(row_id.to_string())
                .or_default()
                .insert(cell_id.to_string(), value);
            Ok(())
        }
    }

    #[derive(Default)]
    struct Book(RwLock<BTreeMap<String, Rows>>);

    impl TablesBackend for Book {
        fn table_ids(&self) -> Result<Vec<String>> {
            Ok(self.0.read()?.keys().cloned().collect())
        }
        fn row_ids(&self, table_id: &str) -> Result<Vec<String>> {
            Ok(self
                .0
                .read()?
                .get(table_id)
                .map(|rows| rows.keys().cloned().collect())
                .unwrap_or_default())
        }
        fn cell_ids(&self, table_id: &str, row_id: &str) -> Result<Vec<String>> {
            Ok(self
                .0
                .read()?
                .get(table_id)
                .and_then(|rows| rows.get(row_id))
                .map(|row| row.keys().cloned().collect())
                .unwrap_or_default())
        }
        fn read_cell(&self, table_id: &str, row_id: &str, cell_id: &str) -> Result<Option<Value>> {
            Ok(self
                .0
                .read()?
                .get(table_id)
                .and_then(|rows| rows.get(row_id))
                .and_then(|row| row.get(cell_id))
                .cloned())
        }
        fn write_cell(&self, table_id: &str, row_id: &str, cell_id: &str, value: Value) -> Result<()> {
            self.0
                .write()?
                .entry(table_id.to_string())
                .or_default()
                .entry(row_id.to_string())
                .or_default()
                .insert(cell_id.to_string(), value);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_value_connector() {
        let connector = ValueConnector::new(Cell::default());
        assert_eq!(connector.depth(), 0);

        connector
            .write_value(&Address::root(), &Value::from("only"))
            .await
            .unwrap();
        assert_eq!(
            connector.read_value(&Address::root()).await.unwrap(),
            Some(Value::from("only"))
        );
        assert!(connector
            .write_value(&Address::new(["x"]), &Value::Null)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_values_connector() {
        let connector = ValuesConnector::new(KeyValue::default());
        connector
            .write_value(&Address::new(["b"]), &Value::from(2.0))
            .await
            .unwrap();
        connector
            .write_value(&Address::new(["a"]), &Value::from(1.0))
            .await
            .unwrap();

        assert_eq!(
            connector.read_child_ids(&Address::root()).await.unwrap(),
            vec!["a", "b"]
        );
        assert_eq!(
            connector.read_value(&Address::new(["b"])).await.unwrap(),
            Some(Value::from(2.0))
        );
    }

    #[tokio::test]
    async fn test_table_connector_snapshot() {
        let connector = TableConnector::new(Sheet::default());
        connector
            .write_value(&Address::new(["r1", "name"]), &Value::from("x"))
            .await
            .unwrap();
        connector
            .write_value(&Address::new(["r2", "name"]), &Value::Tombstone)
            .await
            .unwrap();

        let data = connector.get_data().await.unwrap();
        let leaves: Vec<_> = data.leaves().into_iter().map(|(a, _)| a).collect();
        assert_eq!(
            leaves,
            vec![Address::new(["r1", "name"]), Address::new(["r2", "name"])]
        );
    }

    #[tokio::test]
    async fn test_tables_connector() {
        let connector = TablesConnector::new(Book::default());
        let address = Address::new(["pets", "fido", "species"]);
        connector
            .write_value(&address, &Value::from("dog"))
            .await
            .unwrap();

        assert_eq!(
            connector.read_child_ids(&Address::new(["pets"])).await.unwrap(),
            vec!["fido"]
        );
        assert_eq!(
            connector.backend().read_cell("pets", "fido", "species").unwrap(),
            Some(Value::from("dog"))
        );
        assert!(connector
            .write_value(&Address::new(["pets", "fido"]), &Value::Null)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_notify_changed() {
        let connector = ValuesConnector::new(KeyValue::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        connector.connect(tx).await.unwrap();

        connector.backend().write_value("k", Value::Boolean(true)).unwrap();
        connector.notify_changed(Address::new(["k"])).unwrap();
        assert_eq!(rx.recv().await, Some(Address::new(["k"])));

        assert!(connector.notify_changed(Address::root()).is_err());
    }
}
