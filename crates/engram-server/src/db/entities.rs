// db/entities.rs
// Entity graph: named nodes, observations, typed relations, type hierarchy

use engram_types::{Entity, EntityRelation};
use rusqlite::{Connection, OptionalExtension, Row};

use crate::utils::new_id;

/// Transitive-closure walk over entity_types is capped to bound work.
const MAX_TYPE_DESCENDANTS: usize = 100;

pub const ENTITY_COLUMNS: &str =
    "id, project_id, name, entity_type, observations, created_at, updated_at";

pub fn parse_entity_row(row: &Row) -> rusqlite::Result<Entity> {
    let observations_json: String = row.get(4)?;
    Ok(Entity {
        id: row.get(0)?,
        project_id: row.get(1)?,
        name: row.get(2)?,
        entity_type: row.get(3)?,
        observations: serde_json::from_str(&observations_json).unwrap_or_default(),
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

/// Create an entity, or merge into the existing row on (project, name)
/// collision: observations are deduplicated and unioned. Returns the entity.
pub fn create_entity_sync(
    conn: &Connection,
    project_id: &str,
    name: &str,
    entity_type: &str,
    observations: &[String],
) -> rusqlite::Result<Entity> {
    if let Some(mut existing) = get_entity_sync(conn, project_id, name)? {
        let mut merged = existing.observations.clone();
        for obs in observations {
            if !merged.contains(obs) {
                merged.push(obs.clone());
            }
        }
        let obs_json = serde_json::to_string(&merged).unwrap_or_else(|_| "[]".to_string());
        conn.execute(
            "UPDATE entities SET observations = ?2, updated_at = CURRENT_TIMESTAMP WHERE id = ?1",
            rusqlite::params![existing.id, obs_json],
        )?;
        existing.observations = merged;
        return Ok(existing);
    }

    let id = new_id();
    let obs_json = serde_json::to_string(observations).unwrap_or_else(|_| "[]".to_string());
    conn.execute(
        "INSERT INTO entities (id, project_id, name, entity_type, observations)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        rusqlite::params![id, project_id, name, entity_type, obs_json],
    )?;
    get_entity_sync(conn, project_id, name)?
        .ok_or(rusqlite::Error::QueryReturnedNoRows)
}

pub fn get_entity_sync(
    conn: &Connection,
    project_id: &str,
    name: &str,
) -> rusqlite::Result<Option<Entity>> {
    conn.query_row(
        &format!("SELECT {ENTITY_COLUMNS} FROM entities WHERE project_id = ?1 AND name = ?2"),
        rusqlite::params![project_id, name],
        parse_entity_row,
    )
    .optional()
}

/// Append observations to an existing entity, deduplicating.
/// Returns None when the entity does not exist.
pub fn observe_entity_sync(
    conn: &Connection,
    project_id: &str,
    name: &str,
    observations: &[String],
) -> rusqlite::Result<Option<Entity>> {
    let Some(mut entity) = get_entity_sync(conn, project_id, name)? else {
        return Ok(None);
    };
    for obs in observations {
        if !entity.observations.contains(obs) {
            entity.observations.push(obs.clone());
        }
    }
    let obs_json = serde_json::to_string(&entity.observations).unwrap_or_else(|_| "[]".to_string());
    conn.execute(
        "UPDATE entities SET observations = ?2, updated_at = CURRENT_TIMESTAMP WHERE id = ?1",
        rusqlite::params![entity.id, obs_json],
    )?;
    Ok(Some(entity))
}

/// Search entities by name/observation substring.
pub fn search_entities_sync(
    conn: &Connection,
    project_id: &str,
    query: &str,
    limit: usize,
) -> rusqlite::Result<Vec<Entity>> {
    let pattern = format!(
        "%{}%",
        query.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
    );
    let sql = format!(
        "SELECT {ENTITY_COLUMNS} FROM entities
         WHERE project_id = ?1
           AND (name LIKE ?2 ESCAPE '\\' OR observations LIKE ?2 ESCAPE '\\')
         ORDER BY updated_at DESC
         LIMIT ?3"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        rusqlite::params![project_id, pattern, limit as i64],
        parse_entity_row,
    )?;
    rows.collect()
}

/// Delete an entity and its relations. Returns whether it existed.
pub fn delete_entity_sync(
    conn: &Connection,
    project_id: &str,
    name: &str,
) -> rusqlite::Result<bool> {
    let Some(entity) = get_entity_sync(conn, project_id, name)? else {
        return Ok(false);
    };
    conn.execute(
        "DELETE FROM entity_relations WHERE from_entity = ?1 OR to_entity = ?1",
        [&entity.id],
    )?;
    conn.execute("DELETE FROM entities WHERE id = ?1", [&entity.id])?;
    Ok(true)
}

/// Link two entities by name with a typed relation. Both must exist.
pub fn link_entities_sync(
    conn: &Connection,
    project_id: &str,
    from_name: &str,
    relation_type: &str,
    to_name: &str,
) -> rusqlite::Result<Option<EntityRelation>> {
    let (Some(from), Some(to)) = (
        get_entity_sync(conn, project_id, from_name)?,
        get_entity_sync(conn, project_id, to_name)?,
    ) else {
        return Ok(None);
    };

    let id = new_id();
    conn.execute(
        "INSERT INTO entity_relations (id, project_id, from_entity, to_entity, relation_type)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        rusqlite::params![id, project_id, from.id, to.id, relation_type],
    )?;
    conn.query_row(
        "SELECT id, project_id, from_entity, to_entity, relation_type, created_at
         FROM entity_relations WHERE id = ?1",
        [&id],
        |row| {
            Ok(EntityRelation {
                id: row.get(0)?,
                project_id: row.get(1)?,
                from_entity: row.get(2)?,
                to_entity: row.get(3)?,
                relation_type: row.get(4)?,
                created_at: row.get(5)?,
            })
        },
    )
    .optional()
}

/// Register a new entity type under an optional parent. The hierarchy is a
/// tree; the parent must already exist.
pub fn add_entity_type_sync(
    conn: &Connection,
    name: &str,
    parent_type: Option<&str>,
    description: Option<&str>,
) -> rusqlite::Result<bool> {
    if let Some(parent) = parent_type {
        let exists: i64 = conn.query_row(
            "SELECT COUNT(*) FROM entity_types WHERE name = ?1",
            [parent],
            |row| row.get(0),
        )?;
        if exists == 0 {
            return Ok(false);
        }
    }
    conn.execute(
        "INSERT OR IGNORE INTO entity_types (name, parent_type, description) VALUES (?1, ?2, ?3)",
        rusqlite::params![name, parent_type, description],
    )?;
    Ok(true)
}

/// List all entity types with their parents.
pub fn list_entity_types_sync(conn: &Connection) -> rusqlite::Result<Vec<(String, Option<String>, Option<String>)>> {
    let mut stmt =
        conn.prepare("SELECT name, parent_type, description FROM entity_types ORDER BY name")?;
    let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?;
    rows.collect()
}

/// Collect a type plus all transitive descendants, capped at
/// MAX_TYPE_DESCENDANTS to bound work on pathological hierarchies.
pub fn type_with_descendants_sync(
    conn: &Connection,
    root: &str,
) -> rusqlite::Result<Vec<String>> {
    let mut result = vec![root.to_string()];
    let mut frontier = vec![root.to_string()];

    while let Some(current) = frontier.pop() {
        if result.len() >= MAX_TYPE_DESCENDANTS {
            break;
        }
        let mut stmt = conn.prepare("SELECT name FROM entity_types WHERE parent_type = ?1")?;
        let children: Vec<String> = stmt
            .query_map([&current], |row| row.get(0))?
            .filter_map(|r| r.ok())
            .collect();
        for child in children {
            if !result.contains(&child) {
                result.push(child.clone());
                frontier.push(child);
            }
        }
    }

    result.truncate(MAX_TYPE_DESCENDANTS);
    Ok(result)
}

/// Find entities whose type is `root` or any descendant, optionally filtered
/// by a name/observation substring.
pub fn search_entities_by_type_hierarchy_sync(
    conn: &Connection,
    project_id: &str,
    root: &str,
    query: Option<&str>,
    limit: usize,
) -> rusqlite::Result<Vec<Entity>> {
    let types = type_with_descendants_sync(conn, root)?;
    let placeholders: Vec<String> = (0..types.len()).map(|i| format!("?{}", i + 3)).collect();
    let sql = format!(
        "SELECT {ENTITY_COLUMNS} FROM entities
         WHERE project_id = ?1
           AND (?2 IS NULL OR name LIKE '%' || ?2 || '%' OR observations LIKE '%' || ?2 || '%')
           AND entity_type IN ({})
         ORDER BY updated_at DESC",
        placeholders.join(", ")
    );

    let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
    params.push(Box::new(project_id.to_string()));
    params.push(Box::new(query.map(|q| q.to_string())));
    for t in &types {
        params.push(Box::new(t.clone()));
    }

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(rusqlite::params_from_iter(params), parse_entity_row)?;
    let mut entities: Vec<Entity> = rows.collect::<rusqlite::Result<_>>()?;
    entities.truncate(limit);
    Ok(entities)
}
