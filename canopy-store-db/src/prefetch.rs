// SPDX-FileCopyrightText: 2026 Canopy contributors
// SPDX-License-Identifier: MIT

//! Fetch the descendants of matched rows in a single recursive query.

use canopy_store_core::{DataNode, FetchDescendants};
use rusqlite::named_params;
use tracing::debug;

use crate::compiler::json_array;
use crate::connection::FragmentStore;
use crate::error::Result;
use crate::mapping::FragmentTree;
use crate::types::Fragment;

const PREFETCH_SQL: &str = r#"
WITH RECURSIVE parent_search(id, depth) AS (
    SELECT id, 0 FROM fragment WHERE id IN (SELECT value FROM json_each(:ids))
    UNION
    SELECT child.id, parent_search.depth + 1
    FROM fragment child
    JOIN parent_search ON child.parent_id = parent_search.id
    WHERE parent_search.depth < :max_depth
)
SELECT id, owner_id, path, parent_id, attributes
FROM fragment
WHERE id IN (SELECT id FROM parent_search)
ORDER BY id
"#;

impl FragmentStore {
    /// Load `roots` together with their descendants down to `fetch`.
    ///
    /// With [`FetchDescendants::Omit`] no query is issued.
    pub(crate) fn prefetch_descendants(
        &self,
        roots: Vec<Fragment>,
        fetch: FetchDescendants,
    ) -> Result<FragmentTree> {
        if !fetch.has_next() || roots.is_empty() {
            return Ok(FragmentTree::from_rows(roots));
        }
        let ids: Vec<i64> = roots.iter().map(|f| f.id).collect();
        let max_depth = fetch.max_depth().map_or(i64::MAX, i64::from);

        let mut stmt = self.conn.prepare_cached(PREFETCH_SQL)?;
        let rows = stmt
            .query_map(
                named_params! { ":ids": json_array(&ids)?, ":max_depth": max_depth },
                Fragment::from_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let tree = FragmentTree::from_rows(rows);
        debug!(roots = tree.roots().len(), rows = tree.len(), %fetch, "prefetched descendants");
        Ok(tree)
    }

    /// Turn matched rows into nodes, in row order.
    pub(crate) fn materialize(
        &self,
        matched: Vec<Fragment>,
        fetch: FetchDescendants,
    ) -> Result<Vec<DataNode>> {
        let ids: Vec<i64> = matched.iter().map(|f| f.id).collect();
        let tree = self.prefetch_descendants(matched, fetch)?;
        tree.to_data_nodes(&ids, fetch)
    }
}
