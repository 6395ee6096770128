//! Shared plan and catalog builders for the integration tests.
#![allow(dead_code)]

use slotforge::slotforge_core::abt::{
    CollationOp, Expr, FieldProjectionMap, Node, Operations, Path, PlanBuilder,
};
use slotforge::slotforge_core::scan_def::{IndexCollationEntry, ScanDefinition, ScanDefinitions};
use slotforge::slotforge_core::value::Value;

pub fn catalog() -> ScanDefinitions {
    let mut defs = ScanDefinitions::new();
    defs.insert(
        "c1".into(),
        ScanDefinition::new("test.c1").with_uuid(uuid_for(1)),
    );
    defs.insert("c2".into(), ScanDefinition::new("test.c2"));
    defs.insert(
        "sharded".into(),
        ScanDefinition::new("test.sharded").with_shard_key(vec![
            IndexCollationEntry::new(Path::get("a", Path::Identity), CollationOp::Ascending),
            IndexCollationEntry::new(
                Path::get("b", Path::get("c", Path::Identity)),
                CollationOp::Ascending,
            ),
            IndexCollationEntry::new(Path::get("d", Path::Identity), CollationOp::Clustered),
        ]),
    );
    defs.insert("unsharded".into(), ScanDefinition::new("test.unsharded"));
    defs
}

pub fn uuid_for(n: u128) -> uuid::Uuid {
    uuid::Uuid::from_u128(0x5f1c_0c2e_8d4b_4a55_9f34_0000_0000_0000 + n)
}

/// `a.b = <v>` as a filter path over `root`.
pub fn field_eq(field: &str, nested: &str, v: Value) -> Expr {
    Expr::eval_filter(
        Path::get(
            field,
            Path::traverse(Path::get(nested, Path::compare(Operations::Eq, Expr::constant(v)))),
        ),
        Expr::var("root"),
    )
}

/// Root(root) <- Filter(pred) <- PhysicalScan(c1).
pub fn filtered_scan(b: &mut PlanBuilder, pred: Expr) -> Node {
    let scan = b.physical_scan(FieldProjectionMap::root("root"), "c1", false);
    let filter = b.filter(pred, scan);
    b.root(["root"], filter)
}
