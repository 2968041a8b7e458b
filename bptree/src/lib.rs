// Layout of the index:
// 1. A block store hands out fixed-size blocks addressed by position
//     - `BlockFile` on disk, `MemoryStore` for tests
// 2. Block 0 is the file header, block 1 the tree metadata
// 3. The B+ tree keeps its root resident and reads every other node on demand
//
// System components:
//  - Block storage
//  - B+ tree engine with free-list allocation
//  - Environment configuration for the demo binary

pub mod config;
pub mod storage;
