// db/mod.rs
// Unified database layer with rusqlite + sqlite-vec

mod chat;
mod edges;
mod entities;
mod memory;
pub mod pool;
mod resolutions;
mod schema;
mod scratchpad;
mod tasks;
#[cfg(test)]
pub(crate) mod test_support;
mod toollog;

pub use chat::{
    ConversationRow, MessageRow, auto_sourced_memory_ids_sync, conversation_hash_exists_sync,
    conversation_messages_sync, conversation_topics_sync, find_conversation_sync,
    insert_conversation_sync, insert_memory_source_sync, insert_message_sync, insert_summary_sync,
    insert_tool_use_sync, insert_topic_sync, list_conversations_sync, search_summaries_sync,
};
pub use edges::{
    create_edge_sync, get_edge_sync, invalidate_edge_sync, live_contradiction_edges_sync,
    parse_edge_row, query_edges_sync,
};
pub use entities::{
    add_entity_type_sync, create_entity_sync, delete_entity_sync, get_entity_sync,
    link_entities_sync, list_entity_types_sync, observe_entity_sync,
    search_entities_by_type_hierarchy_sync, search_entities_sync, type_with_descendants_sync,
};
pub use memory::{
    InsertMemoryParams, MEMORY_COLUMNS, UpdateMemoryFields, bump_contradiction_count_sync,
    bump_source_count_sync, find_memories_without_embeddings_sync, get_embedding_sync,
    get_memory_sync, insert_memory_sync, is_duplicate_content_sync, list_memories_sync,
    live_embedded_memories_sync, parse_memory_row, purge_memory_sync, record_access_sync,
    soft_delete_memory_sync, store_embedding_sync, update_memory_sync,
};
pub use pool::DatabasePool;
pub use resolutions::{
    get_resolution_sync, insert_pending_resolution_sync, mark_resolved_sync,
    pending_resolutions_for_memory_sync, pending_resolutions_sync,
};
pub use schema::{DEFAULT_EMBEDDING_DIM, ensure_vec_table, run_all_migrations};
pub use scratchpad::{
    release_advisory_lock_sync, scratch_clear_sync, scratch_delete_sync, scratch_gc_sync,
    scratch_get_sync, scratch_list_sync, scratch_set_sync, try_advisory_lock_sync,
};
pub use tasks::{
    check_due_tasks_sync, finish_task_sync, get_task_sync, insert_task_sync, list_tasks_sync,
    parse_task_row, rearm_task_sync,
};
pub use toollog::{gc_tool_calls_sync, last_tool_call_at_sync, log_tool_call_sync};

/// Discard and log row-mapping errors inside query_map pipelines.
pub fn log_and_discard<T>(result: rusqlite::Result<T>) -> Option<T> {
    match result {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::warn!("Discarding unreadable row: {}", e);
            None
        }
    }
}
