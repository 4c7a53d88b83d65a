pub mod core;
pub mod row;
pub mod codec;
pub mod query;
pub mod kv;
pub mod translate;
pub mod storage;
pub mod cache;
pub mod index;
pub mod schema;
pub mod writer;

/*
┌─────────────────────────────────────────────────────────────────────────────┐
│                         LATTICA STRUCT ARCHITECTURE                          │
└─────────────────────────────────────────────────────────────────────────────┘

┌──────────────────────────────── CORE LAYER ─────────────────────────────────┐
│                                                                              │
│  ┌────────────────────────────────────────────────────────────────────┐    │
│  │                          struct Database                            │    │
│  │  ┌──────────────────────────────────────────────────────────────┐ │    │
│  │  │ config: Config                 // Paths, cache ceiling, merge │ │    │
│  │  │ layout: Arc<StorageLayout>     // Data directory layout      │ │    │
│  │  │ cache: Arc<ShardCache>         // Owns shard handles         │ │    │
│  │  │ index: Arc<ViewShardIndex>     // Rosters + record sequence  │ │    │
│  │  └──────────────────────────────────────────────────────────────┘ │    │
│  └────────────────────────────────────────────────────────────────────┘    │
│                                                                              │
│  ┌──────────────────┐  ┌──────────────────┐  ┌──────────────────────────┐  │
│  │ struct Config    │  │ struct Record    │  │ enum FieldValue          │  │
│  │ • storage_path   │  │ • fields:        │  │ • Bool / Int / Float     │  │
│  │ • cache ceiling  │  │   HashMap<String,│  │ • String / Bytes         │  │
│  │ • roster_merge   │  │   FieldValue>    │  │ • StringSet / Timestamp  │  │
│  │ • time_format    │  └──────────────────┘  └──────────────────────────┘  │
│  └──────────────────┘                                                       │
└──────────────────────────────────────────────────────────────────────────────┘

┌────────────────────────────── ENCODING LAYER ───────────────────────────────┐
│                                                                              │
│  codec::boolean   row 0 = false, row 1 = true                               │
│  codec::bsi       row 0 = exists, row 1 = sign, rows 2.. = magnitude bits   │
│  codec::mutex     one row per value index, one-hot per column               │
│  codec::set       one row per value index, any number per column            │
│                                                                              │
│  ┌──────────────────┐  ┌───────────────────┐  ┌─────────────────────────┐  │
│  │ struct Row       │  │ trait RowCursor   │  │ query::compare          │  │
│  │ • fragment bits  │  │ • row(row_id)     │  │ • Op enum               │  │
│  │ • union/intersect│  │ • max()           │  │ • MSB→LSB plane sweep   │  │
│  │ • columns(shard) │  │ • rows(start, f)  │  │ • signed over unsigned  │  │
│  └──────────────────┘  └───────────────────┘  └─────────────────────────┘  │
│                                                                              │
│  trait Filter (BoolEquals / BsiCompare / MutexEquals / SetContains)         │
│    composed by the plan layer without knowing encodings                     │
└──────────────────────────────────────────────────────────────────────────────┘

┌─────────────────────────────── STORAGE LAYER ───────────────────────────────┐
│                                                                              │
│  ┌────────────────────────┐  ┌──────────────────────┐  ┌─────────────────┐ │
│  │ struct ShardDb         │  │ struct ShardCache    │  │ struct KvStore  │ │
│  │ • mmap + directory     │  │ • LRU by shard, cost │  │ • appended      │ │
│  │ • StreamCursor         │  │   = on-disk bytes    │  │   batches + crc │ │
│  │ • WriteTxn (rewrite)   │  │ • evict → close()    │  │ • BTreeMap      │ │
│  └────────────────────────┘  │ • view()/update()    │  │ • sequences     │ │
│                               └──────────────────────┘  └─────────────────┘ │
│  ┌────────────────────────┐  ┌──────────────────────────────────────────┐  │
│  │ struct TranslateStore  │  │ struct ViewShardIndex                    │  │
│  │ • (field, key) ↔ id    │  │ • view → shard roster bitmap             │  │
│  │ • per-store sequence   │  │ • record-ID sequence                     │  │
│  └────────────────────────┘  │ • joint commit with TranslateStore       │  │
│                               └──────────────────────────────────────────┘  │
└──────────────────────────────────────────────────────────────────────────────┘

┌──────────────────────────────── RELATIONSHIPS ──────────────────────────────┐
│                                                                              │
│  SchemaWriter ──assigns──> record id ──locates──> shard (id / SHARD_WIDTH)  │
│       │                                                                      │
│       ├──routes──> FieldKind ──selects──> codec ──mutates──> accumulator    │
│       │                                                                      │
│       └──save──> ShardCache.update ──merges──> ShardDb streams              │
│                        │                                                     │
│                        └──then──> ViewShardIndex.commit (rosters + keys)    │
│                                                                              │
│  query: ViewShardIndex.shards(view) ──> ShardCache.view ──> Filter.apply    │
│             ──> compare sweep over StreamCursor ──> Row ──> columns(shard)  │
│                                                                              │
└──────────────────────────────────────────────────────────────────────────────┘
*/
