// SPDX-FileCopyrightText: 2026 Canopy contributors
// SPDX-License-Identifier: MIT

//! Database schema definitions.
//!
//! Every tree node is one `fragment` row. A row's `attributes` column holds
//! the node's leaves as a JSON object and `parent_id` links it to the row of
//! its parent; top-level nodes have no parent.

/// Dataspaces, owners and fragments
pub const SCHEMA_SQL: &str = r#"
create table if not exists dataspace (
    id   integer primary key autoincrement not null,
    name text unique not null
);

create table if not exists owner (
    id           integer primary key autoincrement not null,
    dataspace_id integer not null,
    name         text not null,
    unique (dataspace_id, name),
    foreign key (dataspace_id) references dataspace(id) on delete cascade
);

create table if not exists fragment (
    id         integer primary key autoincrement not null,
    owner_id   integer not null,
    path       text not null,
    parent_id  integer,
    attributes text not null default '{}',
    unique (owner_id, path),
    foreign key (owner_id) references owner(id) on delete cascade,
    foreign key (parent_id) references fragment(id) on delete cascade
);

create index if not exists IndexFragmentParent on fragment(parent_id);
"#;

/// Advisory owner locks held by sessions; `acquired_at` is Unix time in
/// milliseconds and starts the lease
pub const LOCK_SCHEMA_SQL: &str = r#"
create table if not exists owner_lock (
    owner_id    integer primary key not null,
    session_id  text not null,
    acquired_at integer not null,
    foreign key (owner_id) references owner(id) on delete cascade
);

create index if not exists IndexOwnerLockSession on owner_lock(session_id);
"#;

/// Stored in `PRAGMA user_version`.
pub const SCHEMA_VERSION: i32 = 1;
