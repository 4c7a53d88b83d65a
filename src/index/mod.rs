pub mod viewshard;
