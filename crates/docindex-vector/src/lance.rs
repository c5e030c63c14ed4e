//! LanceDB-backed [`VectorStore`]. One table per index, plus a shared meta
//! table recording each index's metric.

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use lancedb::query::{ExecutableQuery, QueryBase, Select};
use lancedb::{Connection, DistanceType, Table};
use tracing::debug;

use docindex_core::traits::VectorStore;
use docindex_core::types::{
    ChunkId, IndexDescription, MetadataFilter, Metric, ScoredRecord, VectorRecord,
};
use docindex_core::{Error, Result};

use crate::schema::{build_chunk_schema, vector_dimension};
use crate::search::{collect_ids, collect_scored};
use crate::table::{ensure_table, get_meta, open_db, set_meta, sql_in, table_exists};
use crate::writer::merge_records;

pub struct LanceStore {
    db: Connection,
    table_name: String,
    metric: Metric,
}

impl LanceStore {
    pub async fn open(uri: &str, table_name: &str, metric: Metric) -> Result<Self> {
        let db = open_db(uri).await.map_err(Error::store)?;
        Ok(Self { db, table_name: table_name.to_string(), metric })
    }

    fn metric_key(&self) -> String {
        format!("{}:metric", self.table_name)
    }

    fn distance_type(&self) -> DistanceType {
        match self.metric {
            Metric::Cosine => DistanceType::Cosine,
            Metric::L2 => DistanceType::L2,
            Metric::Dot => DistanceType::Dot,
        }
    }

    async fn table(&self) -> anyhow::Result<Table> {
        self.db
            .open_table(&self.table_name)
            .execute()
            .await
            .with_context(|| format!("index '{}' has not been created", self.table_name))
    }

    async fn table_dimension(&self, table: &Table) -> anyhow::Result<usize> {
        let schema = table.schema().await?;
        vector_dimension(&schema)
            .ok_or_else(|| anyhow!("table '{}' has no vector column", self.table_name))
    }

    async fn describe_or_create(
        &self,
        dimension: usize,
        metric: Metric,
    ) -> anyhow::Result<IndexDescription> {
        let width =
            i32::try_from(dimension).map_err(|_| anyhow!("dimension {dimension} too large"))?;
        let created = ensure_table(&self.db, &self.table_name, build_chunk_schema(width)).await?;
        if created {
            set_meta(&self.db, &self.metric_key(), metric.as_str()).await?;
            return Ok(IndexDescription { dimension, metric, created });
        }

        let table = self.table().await?;
        let existing_dim = self.table_dimension(&table).await?;
        let existing_metric = match get_meta(&self.db, &self.metric_key()).await? {
            Some(m) => m.parse::<Metric>()?,
            None => {
                set_meta(&self.db, &self.metric_key(), metric.as_str()).await?;
                metric
            }
        };
        Ok(IndexDescription { dimension: existing_dim, metric: existing_metric, created })
    }

    async fn delete_where(&self, predicate: &str) -> anyhow::Result<usize> {
        if !table_exists(&self.db, &self.table_name).await? {
            return Ok(0);
        }
        let table = self.table().await?;
        let n = table.count_rows(Some(predicate.to_string())).await?;
        if n > 0 {
            let _ = table.delete(predicate).await?;
        }
        debug!(table = %self.table_name, predicate, deleted = n, "lance delete");
        Ok(n)
    }

    async fn merge(&self, records: &[VectorRecord]) -> anyhow::Result<()> {
        let table = self.table().await?;
        let dim = self.table_dimension(&table).await?;
        let width = i32::try_from(dim).map_err(|_| anyhow!("dimension {dim} too large"))?;
        merge_records(&table, records, width).await
    }

    async fn nearest(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> anyhow::Result<Vec<ScoredRecord>> {
        if !table_exists(&self.db, &self.table_name).await? {
            return Ok(Vec::new());
        }
        let table = self.table().await?;
        if table.count_rows(None).await? == 0 {
            return Ok(Vec::new());
        }
        let mut q = table
            .vector_search(vector.to_vec())?
            .distance_type(self.distance_type())
            .limit(top_k);
        if let Some(sql) = filter.and_then(MetadataFilter::to_sql) {
            q = q.only_if(sql);
        }
        collect_scored(q.execute().await?, self.metric).await
    }

    async fn ids_matching(&self, filter: &MetadataFilter) -> anyhow::Result<Vec<ChunkId>> {
        if !table_exists(&self.db, &self.table_name).await? {
            return Ok(Vec::new());
        }
        let table = self.table().await?;
        let mut q = table.query().select(Select::columns(&["id"]));
        if let Some(sql) = filter.to_sql() {
            q = q.only_if(sql);
        }
        collect_ids(q.execute().await?).await
    }

    async fn count_rows(&self, filter: Option<&MetadataFilter>) -> anyhow::Result<usize> {
        if !table_exists(&self.db, &self.table_name).await? {
            return Ok(0);
        }
        let table = self.table().await?;
        Ok(table.count_rows(filter.and_then(MetadataFilter::to_sql)).await?)
    }
}

#[async_trait]
impl VectorStore for LanceStore {
    fn name(&self) -> &str {
        &self.table_name
    }

    async fn create_if_absent(&self, dimension: usize, metric: Metric) -> Result<IndexDescription> {
        self.describe_or_create(dimension, metric).await.map_err(Error::store)
    }

    async fn upsert(&self, records: &[VectorRecord]) -> Result<()> {
        self.merge(records).await.map_err(Error::store)
    }

    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<ScoredRecord>> {
        self.nearest(vector, top_k, filter).await.map_err(Error::store)
    }

    async fn delete(&self, ids: &[ChunkId]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        self.delete_where(&sql_in("id", ids)).await.map_err(Error::store)
    }

    async fn matching_ids(&self, filter: &MetadataFilter) -> Result<Vec<ChunkId>> {
        self.ids_matching(filter).await.map_err(Error::store)
    }

    async fn delete_matching(&self, filter: &MetadataFilter) -> Result<Option<usize>> {
        let Some(predicate) = filter.to_sql() else {
            return Ok(None);
        };
        self.delete_where(&predicate).await.map(Some).map_err(Error::store)
    }

    async fn count(&self, filter: Option<&MetadataFilter>) -> Result<usize> {
        self.count_rows(filter).await.map_err(Error::store)
    }
}
