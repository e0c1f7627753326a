//! DWARFローダー・シンボル解決・型抽出のテスト
//!
//! テストバイナリ自身のデバッグ情報を読み込んで検証します。

use std::hint::black_box;
use std::mem::offset_of;
use tsubame_symbols::{
    BaseTypeEncoding, DwarfLoader, InputLocation, SymbolIndex, SymbolResolver, Type,
};

#[allow(dead_code)]
struct LoaderSampleBase {
    tag: u16,
}

#[allow(dead_code)]
struct LoaderSample {
    count: u32,
    total: u64,
    base: LoaderSampleBase,
    next: *const LoaderSample,
}

#[inline(never)]
fn loader_sample_function(sample: &LoaderSample) -> u64 {
    sample.total + u64::from(sample.count) + u64::from(sample.base.tag)
}

fn keep_sample_alive() -> u64 {
    let sample = LoaderSample {
        count: 1,
        total: 2,
        base: LoaderSampleBase { tag: 3 },
        next: std::ptr::null(),
    };
    black_box(loader_sample_function(black_box(&sample)))
}

fn self_exe() -> std::path::PathBuf {
    std::env::current_exe().expect("current_exe")
}

#[test]
fn test_find_sample_function_symbol() {
    keep_sample_alive();

    let loader = DwarfLoader::load(self_exe()).expect("Failed to load test binary");
    let resolver = SymbolResolver::new(&loader).expect("Failed to create symbol resolver");

    let found = resolver.find_symbols("loader_sample_function");
    assert!(!found.is_empty(), "Should find loader_sample_function");

    let sym = &found[0];
    assert!(sym.display_name().contains("loader_sample_function"));
    let reverse = resolver.reverse_resolve(sym.address).expect("reverse resolve");
    assert_eq!(reverse.address, sym.address);
}

#[test]
fn test_extract_struct_layout() {
    keep_sample_alive();

    let index = SymbolIndex::new();
    index.add_module(self_exe(), 0).expect("Failed to index test binary");

    let ty = index.find_type("LoaderSample").expect("LoaderSample type");
    let collection = ty.as_collection().expect("struct");
    assert!(!collection.is_declaration);
    assert_eq!(collection.byte_size as usize, std::mem::size_of::<LoaderSample>());

    let count = collection.find_own_member("count").expect("count member");
    assert_eq!(count.member_location as usize, offset_of!(LoaderSample, count));
    match &*count.member_type {
        Type::Base(base) => {
            assert_eq!(base.name, "u32");
            assert_eq!(base.byte_size, 4);
            assert_eq!(base.encoding, BaseTypeEncoding::Unsigned);
        }
        other => panic!("unexpected type {:?}", other.name()),
    }

    let total = collection.find_own_member("total").expect("total member");
    assert_eq!(total.member_location as usize, offset_of!(LoaderSample, total));

    let base = collection.find_own_member("base").expect("base member");
    assert_eq!(base.member_location as usize, offset_of!(LoaderSample, base));
    assert_eq!(base.member_type.name(), "LoaderSampleBase");

    // 自己参照ポインタも抽出できる
    let next = collection.find_own_member("next").expect("next member");
    assert_eq!(next.member_type.byte_size() as usize, std::mem::size_of::<usize>());

    // 2回目の検索はキャッシュから同じ型を返す
    let again = index.find_type("LoaderSample").expect("cached type");
    assert!(std::rc::Rc::ptr_eq(&ty, &again));
}

#[test]
fn test_resolve_function_location_and_line() {
    keep_sample_alive();

    let index = SymbolIndex::new();
    let module = index.add_module(self_exe(), 0).expect("Failed to index test binary");

    let name = module.symbols().find_symbols("loader_sample_function")[0]
        .demangled_name
        .clone();
    let addresses = index.resolve_input_location(&InputLocation::Symbol(name));
    assert!(!addresses.is_empty());

    let line = index.line_for_address(addresses[0]).expect("line info");
    assert!(line.file.ends_with("test_loader.rs"), "got {}", line.file);

    let range = index
        .line_range_for_address(addresses[0])
        .expect("line range");
    assert!(range.contains(&addresses[0]));
}
