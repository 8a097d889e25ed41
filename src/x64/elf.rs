//! ELF object output for emitted functions.
//!
//! The function body goes into `.text` under a global symbol; every stub it
//! calls becomes an undefined symbol with a PLT-relative relocation on the
//! call's displacement, so the object links against any stub library that
//! exports the registry's link names.

use hashbrown::HashMap;
use object::write::{Object, Relocation, StandardSection, Symbol, SymbolId, SymbolSection};
use object::{
    Architecture, BinaryFormat, Endianness, RelocationEncoding, RelocationFlags, RelocationKind, SymbolFlags,
    SymbolKind, SymbolScope,
};

use super::backend::EmittedFunction;
use crate::core::error::{IntrinsicError, IntrinsicResult};

/// Build a relocatable ELF object defining `symbol` as `function`.
pub fn write_object(symbol: &str, function: &EmittedFunction) -> IntrinsicResult<Vec<u8>> {
    let mut obj = Object::new(BinaryFormat::Elf, Architecture::X86_64, Endianness::Little);
    let text = obj.section_id(StandardSection::Text);
    let offset = obj.append_section_data(text, &function.code, 16);
    obj.add_symbol(Symbol {
        name: symbol.as_bytes().to_vec(),
        value: offset,
        size: function.code.len() as u64,
        kind: SymbolKind::Text,
        scope: SymbolScope::Linkage,
        weak: false,
        section: SymbolSection::Section(text),
        flags: SymbolFlags::None,
    });

    let mut stubs: HashMap<&str, SymbolId> = HashMap::new();
    for relocation in &function.relocations {
        let stub = *stubs.entry(relocation.stub.as_str()).or_insert_with(|| {
            obj.add_symbol(Symbol {
                name: relocation.stub.as_bytes().to_vec(),
                value: 0,
                size: 0,
                kind: SymbolKind::Text,
                scope: SymbolScope::Linkage,
                weak: false,
                section: SymbolSection::Undefined,
                flags: SymbolFlags::None,
            })
        });
        obj.add_relocation(
            text,
            Relocation {
                offset: offset + relocation.offset,
                symbol: stub,
                addend: -4,
                flags: RelocationFlags::Generic {
                    kind: RelocationKind::PltRelative,
                    encoding: RelocationEncoding::Generic,
                    size: 32,
                },
            },
        )
        .map_err(|e| IntrinsicError::Backend(format!("relocation against {}: {e}", relocation.stub)))?;
    }

    log::debug!(
        "object for {symbol}: {} bytes of code, {} stub symbol(s)",
        function.code.len(),
        stubs.len()
    );
    obj.write()
        .map_err(|e| IntrinsicError::Backend(format!("writing object for {symbol}: {e}")))
}
