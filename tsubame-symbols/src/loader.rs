//! ELFとDWARFの読み込み機能

use crate::Result;
use object::{Object, ObjectSection};
use std::borrow::Cow;
use std::fs;
use std::path::{Path, PathBuf};

/// DWARFセクションのリーダー型
pub type DwarfReader = gimli::EndianSlice<'static, gimli::RunTimeEndian>;

/// DWARFローダー
pub struct DwarfLoader {
    path: PathBuf,
    /// オブジェクトファイル
    object_file: object::File<'static>,
    /// DWARFコンテキスト
    dwarf: gimli::Dwarf<DwarfReader>,
}

impl DwarfLoader {
    /// ELFファイルからDWARF情報を読み込む
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let file_data = fs::read(path)
            .map_err(|e| anyhow::anyhow!("Failed to read file {:?}: {}", path, e))?;

        // セクションデータを 'static で保持するためにリークさせる（モジュールはセッション中ずっと生存する）
        let file_data: &'static [u8] = Box::leak(file_data.into_boxed_slice());

        let object_file = object::File::parse(file_data)
            .map_err(|e| anyhow::anyhow!("Failed to parse ELF file {:?}: {}", path, e))?;

        let dwarf = load_dwarf_sections(&object_file)?;

        Ok(Self {
            path: path.to_path_buf(),
            object_file,
            dwarf,
        })
    }

    /// 読み込んだファイルのパス
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// DWARFコンテキストへの参照を取得
    pub fn dwarf(&self) -> &gimli::Dwarf<DwarfReader> {
        &self.dwarf
    }

    /// 同じセクションを参照する新しいDWARFコンテキストを作る（addr2line用）
    pub fn load_dwarf(&self) -> Result<gimli::Dwarf<DwarfReader>> {
        load_dwarf_sections(&self.object_file)
    }

    /// オブジェクトファイルへの参照を取得
    pub fn object_file(&self) -> &object::File<'static> {
        &self.object_file
    }

    /// ビルドIDを16進文字列で取得する
    pub fn build_id(&self) -> Option<String> {
        match self.object_file.build_id() {
            Ok(Some(id)) => Some(hex_string(id)),
            _ => None,
        }
    }

    /// PIE（Position Independent Executable）かどうかを判定する
    ///
    /// PIEの場合、シンボルアドレスはロードアドレスからのオフセットです。
    pub fn is_pie(&self) -> bool {
        use object::ObjectKind;
        matches!(self.object_file.kind(), ObjectKind::Dynamic)
    }
}

/// オブジェクトファイルからDWARFセクションを読み込む
fn load_dwarf_sections(object_file: &object::File<'static>) -> Result<gimli::Dwarf<DwarfReader>> {
    let endian = if object_file.is_little_endian() {
        gimli::RunTimeEndian::Little
    } else {
        gimli::RunTimeEndian::Big
    };

    let load_section = |id: gimli::SectionId| -> Result<DwarfReader> {
        let data: &'static [u8] = match object_file
            .section_by_name(id.name())
            .and_then(|section| section.uncompressed_data().ok())
        {
            Some(Cow::Borrowed(data)) => data,
            // 圧縮セクションは展開後のバッファをリークさせて 'static にする
            Some(Cow::Owned(data)) => Box::leak(data.into_boxed_slice()),
            None => &[],
        };
        Ok(gimli::EndianSlice::new(data, endian))
    };

    gimli::Dwarf::load(load_section)
        .map_err(|e| anyhow::anyhow!("Failed to load DWARF sections: {}", e))
}

/// バイト列を小文字16進文字列に変換する
pub(crate) fn hex_string(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
