pub mod indexed_db;
