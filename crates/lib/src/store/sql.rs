//! # SQL Statements
//!
//! Centralises the DDL for the application tables so the store logic stays
//! readable and the schema lives in one place.

/// Table and index creation statements. Idempotent; executed in order on
/// every startup.
pub const ALL_TABLE_CREATION_SQL: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS workspaces (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        name TEXT NOT NULL,
        public INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
    )",
    "CREATE TABLE IF NOT EXISTS documents (
        id TEXT PRIMARY KEY,
        workspace_id TEXT NOT NULL,
        user_id TEXT NOT NULL,
        title TEXT NOT NULL,
        saving_path TEXT,
        summary TEXT,
        chunk_ids TEXT NOT NULL DEFAULT '[]',
        created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
    )",
    // Chunks are write-once. workspace_id is denormalized from the parent
    // document so retrieval scoping is a single predicate.
    "CREATE TABLE IF NOT EXISTS chunks (
        id TEXT PRIMARY KEY,
        document_id TEXT NOT NULL,
        workspace_id TEXT NOT NULL,
        user_id TEXT NOT NULL,
        content TEXT NOT NULL,
        embedding BLOB NOT NULL,
        embedder TEXT NOT NULL,
        from_line INTEGER NOT NULL,
        to_line INTEGER NOT NULL,
        idx INTEGER NOT NULL,
        created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
    )",
    "CREATE TABLE IF NOT EXISTS chats (
        id TEXT PRIMARY KEY,
        workspace_id TEXT NOT NULL,
        user_id TEXT NOT NULL,
        title TEXT NOT NULL,
        created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
    )",
    // idx orders messages within a chat; gap-free and starting at 0.
    "CREATE TABLE IF NOT EXISTS messages (
        id TEXT PRIMARY KEY,
        chat_id TEXT NOT NULL,
        user_id TEXT NOT NULL,
        role TEXT NOT NULL CHECK (role IN ('user', 'assistant')),
        content TEXT NOT NULL DEFAULT '',
        idx INTEGER NOT NULL,
        created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
    )",
    "CREATE TABLE IF NOT EXISTS quiz_collections (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        name TEXT NOT NULL,
        description TEXT,
        public INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
    )",
    "CREATE TABLE IF NOT EXISTS questions (
        id TEXT PRIMARY KEY,
        quiz_collection_id TEXT NOT NULL,
        user_id TEXT NOT NULL,
        question TEXT NOT NULL,
        answer TEXT NOT NULL,
        false_answers TEXT NOT NULL DEFAULT '[]',
        created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
    )",
    "CREATE INDEX IF NOT EXISTS idx_documents_workspace ON documents (workspace_id)",
    "CREATE INDEX IF NOT EXISTS idx_chunks_workspace ON chunks (workspace_id)",
    "CREATE INDEX IF NOT EXISTS idx_chunks_document ON chunks (document_id)",
    "CREATE INDEX IF NOT EXISTS idx_chats_workspace ON chats (workspace_id)",
    "CREATE INDEX IF NOT EXISTS idx_messages_chat ON messages (chat_id, idx)",
    "CREATE INDEX IF NOT EXISTS idx_quiz_collections_user ON quiz_collections (user_id)",
    "CREATE INDEX IF NOT EXISTS idx_questions_quiz ON questions (quiz_collection_id)",
];

pub const SELECT_WORKSPACE: &str =
    "SELECT id, user_id, name, public, created_at FROM workspaces";

pub const SELECT_DOCUMENT: &str =
    "SELECT id, workspace_id, user_id, title, saving_path, summary, chunk_ids, created_at
     FROM documents";

pub const SELECT_CHAT: &str = "SELECT id, workspace_id, user_id, title, created_at FROM chats";

pub const SELECT_MESSAGE: &str =
    "SELECT id, chat_id, user_id, role, content, idx, created_at FROM messages";

pub const SELECT_QUIZ: &str =
    "SELECT id, user_id, name, description, public, created_at FROM quiz_collections";

pub const SELECT_QUESTION: &str =
    "SELECT id, quiz_collection_id, user_id, question, answer, false_answers, created_at
     FROM questions";

/// Chunk columns joined with the parent document, scoped to one workspace.
/// Column offsets: chunk at 0..=9, document at 10..=17.
pub const SELECT_CHUNKS_WITH_DOCUMENTS: &str =
    "SELECT c.id, c.document_id, c.workspace_id, c.user_id, c.content, c.embedding,
            c.embedder, c.from_line, c.to_line, c.idx,
            d.id, d.workspace_id, d.user_id, d.title, d.saving_path, d.summary,
            d.chunk_ids, d.created_at
     FROM chunks c
     JOIN documents d ON d.id = c.document_id
     WHERE c.workspace_id = ?
     ORDER BY d.id, c.idx";
