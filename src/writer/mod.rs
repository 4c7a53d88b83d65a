pub mod schema_writer;
