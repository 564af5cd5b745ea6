//! Compiles the compact textual type grammar of spec §4.3 into a
//! [`dynffi_types`] descriptor graph. Hand-written recursive descent, per
//! Design Notes §9 ("the grammar is LL(1)"); shares no mutable state with
//! the JIT or ABI classifier crates.

mod emit;

pub use emit::emit;

use dynffi_arena::Arena;
use dynffi_types::{array, function, pointer, primitive, AggregateBuilder, PrimitiveKind, Type};

/// Resolves an `IDENT` named typedef to a concrete descriptor. The grammar
/// allows named types "resolved by host" (§4.3); dynffi itself has no
/// notion of a type namespace, so callers that want `IDENT` support supply
/// one of these.
pub trait TypedefResolver<'a> {
    fn resolve(&self, name: &str) -> Option<Type<'a>>;
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("unexpected character at offset {offset}")]
    UnexpectedChar { offset: usize },
    #[error("unexpected end of input at offset {offset}")]
    UnexpectedEof { offset: usize },
    #[error("unbalanced delimiter at offset {offset}")]
    Unbalanced { offset: usize },
    #[error("duplicate field `{name}` at offset {offset}")]
    DuplicateField { offset: usize, name: String },
    #[error("array/variadic count overflows at offset {offset}")]
    CountOverflow { offset: usize },
    #[error("unknown named type `{name}` at offset {offset}")]
    UnknownTypedef { offset: usize, name: String },
    #[error("member `{name}` has size 0 and is not a trailing flexible array, at offset {offset}")]
    InvalidLayout { offset: usize, name: String },
}

impl ParseError {
    pub fn offset(&self) -> usize {
        match self {
            ParseError::UnexpectedChar { offset }
            | ParseError::UnexpectedEof { offset }
            | ParseError::Unbalanced { offset }
            | ParseError::DuplicateField { offset, .. }
            | ParseError::CountOverflow { offset }
            | ParseError::UnknownTypedef { offset, .. }
            | ParseError::InvalidLayout { offset, .. } => *offset,
        }
    }
}

/// Parse a full signature string into a single descriptor: either a bare
/// `Type` (no top-level `;`) or a `Function` descriptor (one or two
/// top-level `;`, the second marking the fixed/variadic boundary per the
/// Variadic note in §4.3).
pub fn parse<'a>(
    arena: &'a Arena,
    input: &str,
    resolver: Option<&dyn TypedefResolver<'a>>,
) -> Result<Type<'a>, ParseError> {
    let segments = split_top_level(input, b';');
    match segments.len() {
        1 => {
            let (s, e) = segments[0];
            parse_type_entire(arena, input, s, e, resolver)
        }
        2 => {
            let args = parse_arg_list(arena, input, segments[0], resolver)?;
            let ret = parse_type_entire(arena, input, segments[1].0, segments[1].1, resolver)?;
            let fixed = args.len();
            Ok(function(arena, ret, &args, fixed))
        }
        3 => {
            let fixed = parse_arg_list(arena, input, segments[0], resolver)?;
            let variadic = parse_arg_list(arena, input, segments[1], resolver)?;
            let ret = parse_type_entire(arena, input, segments[2].0, segments[2].1, resolver)?;
            let fixed_count = fixed.len();
            let mut args = fixed;
            args.extend(variadic);
            Ok(function(arena, ret, &args, fixed_count))
        }
        _ => Err(ParseError::UnexpectedChar { offset: segments[2].1 }),
    }
}

fn parse_arg_list<'a>(
    arena: &'a Arena,
    input: &str,
    (start, end): (usize, usize),
    resolver: Option<&dyn TypedefResolver<'a>>,
) -> Result<Vec<Type<'a>>, ParseError> {
    if start == end {
        return Ok(Vec::new());
    }
    split_top_level(&input[start..end], b',')
        .into_iter()
        .map(|(s, e)| parse_type_entire(arena, input, start + s, start + e, resolver))
        .collect()
}

fn parse_type_entire<'a>(
    arena: &'a Arena,
    input: &str,
    start: usize,
    end: usize,
    resolver: Option<&dyn TypedefResolver<'a>>,
) -> Result<Type<'a>, ParseError> {
    if start == end {
        return Err(ParseError::UnexpectedEof { offset: start });
    }
    let mut cur = Cursor { src: input, pos: start, end };
    let ty = parse_type(&mut cur, arena, resolver)?;
    if cur.pos != cur.end {
        return Err(ParseError::UnexpectedChar { offset: cur.pos });
    }
    Ok(ty)
}

/// Splits `s` on top-level occurrences of `delim` — i.e. ones not nested
/// inside `()`, `[]`, `{}`, or `<>` — and returns `(start, end)` byte ranges
/// relative to `s`.
fn split_top_level(s: &str, delim: u8) -> Vec<(usize, usize)> {
    let bytes = s.as_bytes();
    let mut depth: i32 = 0;
    let mut segments = Vec::new();
    let mut start = 0usize;
    for (i, &b) in bytes.iter().enumerate() {
        match b {
            b'(' | b'[' | b'{' | b'<' => depth += 1,
            b')' | b']' | b'}' | b'>' => depth -= 1,
            _ if b == delim && depth == 0 => {
                segments.push((start, i));
                start = i + 1;
            }
            _ => {}
        }
    }
    segments.push((start, bytes.len()));
    segments
}

struct Cursor<'s> {
    src: &'s str,
    pos: usize,
    end: usize,
}

impl<'s> Cursor<'s> {
    fn peek(&self) -> Option<u8> {
        if self.pos < self.end {
            self.src.as_bytes().get(self.pos).copied()
        } else {
            None
        }
    }

    fn bump(&mut self) -> Option<u8> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn expect(&mut self, b: u8) -> Result<(), ParseError> {
        match self.peek() {
            Some(c) if c == b => {
                self.bump();
                Ok(())
            }
            Some(_) => Err(ParseError::UnexpectedChar { offset: self.pos }),
            None => Err(ParseError::UnexpectedEof { offset: self.pos }),
        }
    }

    fn read_ident(&mut self) -> Result<(usize, &'s str), ParseError> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == b'_' {
                self.bump();
            } else {
                break;
            }
        }
        if self.pos == start {
            return match self.peek() {
                Some(_) => Err(ParseError::UnexpectedChar { offset: start }),
                None => Err(ParseError::UnexpectedEof { offset: start }),
            };
        }
        Ok((start, &self.src[start..self.pos]))
    }

    fn read_uint(&mut self) -> Result<usize, ParseError> {
        let start = self.pos;
        let mut value: usize = 0;
        let mut any = false;
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                any = true;
                self.bump();
                value = value
                    .checked_mul(10)
                    .and_then(|v| v.checked_add((c - b'0') as usize))
                    .ok_or(ParseError::CountOverflow { offset: start })?;
            } else {
                break;
            }
        }
        if !any {
            return match self.peek() {
                Some(_) => Err(ParseError::UnexpectedChar { offset: start }),
                None => Err(ParseError::UnexpectedEof { offset: start }),
            };
        }
        Ok(value)
    }
}

fn prim_for(c: u8) -> Option<PrimitiveKind> {
    Some(match c {
        b'b' => PrimitiveKind::Bool,
        b'c' => PrimitiveKind::S8,
        b'C' => PrimitiveKind::U8,
        b's' => PrimitiveKind::S16,
        b'S' => PrimitiveKind::U16,
        b'i' => PrimitiveKind::S32,
        b'I' => PrimitiveKind::U32,
        b'l' => PrimitiveKind::Long,
        b'L' => PrimitiveKind::ULong,
        b'q' => PrimitiveKind::S64,
        b'Q' => PrimitiveKind::U64,
        b'f' => PrimitiveKind::F32,
        b'd' => PrimitiveKind::F64,
        b'e' => PrimitiveKind::F80,
        _ => return None,
    })
}

fn parse_type<'a>(
    cur: &mut Cursor<'_>,
    arena: &'a Arena,
    resolver: Option<&dyn TypedefResolver<'a>>,
) -> Result<Type<'a>, ParseError> {
    match cur.peek() {
        None => Err(ParseError::UnexpectedEof { offset: cur.pos }),
        Some(b'*') => {
            cur.bump();
            let inner = parse_type(cur, arena, resolver)?;
            Ok(pointer(arena, Some(inner)))
        }
        Some(b'[') => {
            cur.bump();
            let start = cur.pos;
            let elem = parse_type(cur, arena, resolver)?;
            cur.expect(b';')?;
            let count = cur.read_uint()?;
            cur.expect(b']')?;
            array(arena, elem, count).map_err(|_| ParseError::CountOverflow { offset: start })
        }
        Some(b'{') => {
            cur.bump();
            parse_aggregate(cur, arena, resolver, AggregateBuilder::struct_begin(arena), b'}')
        }
        Some(b'<') => {
            cur.bump();
            parse_aggregate(cur, arena, resolver, AggregateBuilder::union_begin(arena), b'>')
        }
        Some(b'(') => {
            cur.bump();
            let depth_start = cur.pos;
            let mut depth = 1i32;
            while depth > 0 {
                match cur.peek() {
                    Some(b'(') => depth += 1,
                    Some(b')') => depth -= 1,
                    Some(_) => {}
                    None => return Err(ParseError::Unbalanced { offset: depth_start }),
                }
                if depth > 0 {
                    cur.bump();
                }
            }
            let depth_end = cur.pos;
            cur.expect(b')')?;
            parse_sig_str(arena, cur.src, depth_start, depth_end, resolver)
        }
        Some(_) => {
            let (ident_start, ident) = cur.read_ident()?;
            if ident.len() == 1 {
                let byte = ident.as_bytes()[0];
                if byte == b'v' {
                    return Ok(dynffi_types::void());
                }
                if byte == b'p' {
                    return Ok(pointer(arena, None));
                }
                if byte == b'z' {
                    return Ok(dynffi_types::cstring());
                }
                if byte == b'Z' {
                    return Ok(dynffi_types::wstring());
                }
                if let Some(kind) = prim_for(byte) {
                    return Ok(primitive(kind));
                }
            }
            match resolver.and_then(|r| r.resolve(ident)) {
                Some(ty) => Ok(ty),
                None => Err(ParseError::UnknownTypedef { offset: ident_start, name: ident.to_string() }),
            }
        }
    }
}

fn parse_sig_str<'a>(
    arena: &'a Arena,
    full: &str,
    start: usize,
    end: usize,
    resolver: Option<&dyn TypedefResolver<'a>>,
) -> Result<Type<'a>, ParseError> {
    let segments = split_top_level(&full[start..end], b';');
    match segments.len() {
        1 => parse_type_entire(arena, full, start + segments[0].0, start + segments[0].1, resolver),
        2 => {
            let args = parse_arg_list(arena, full, (start + segments[0].0, start + segments[0].1), resolver)?;
            let ret = parse_type_entire(arena, full, start + segments[1].0, start + segments[1].1, resolver)?;
            let fixed = args.len();
            Ok(function(arena, ret, &args, fixed))
        }
        3 => {
            let fixed = parse_arg_list(arena, full, (start + segments[0].0, start + segments[0].1), resolver)?;
            let variadic = parse_arg_list(arena, full, (start + segments[1].0, start + segments[1].1), resolver)?;
            let ret = parse_type_entire(arena, full, start + segments[2].0, start + segments[2].1, resolver)?;
            let fixed_count = fixed.len();
            let mut args = fixed;
            args.extend(variadic);
            Ok(function(arena, ret, &args, fixed_count))
        }
        _ => Err(ParseError::UnexpectedChar { offset: start + segments[2].1 }),
    }
}

fn parse_aggregate<'a>(
    cur: &mut Cursor<'_>,
    arena: &'a Arena,
    resolver: Option<&dyn TypedefResolver<'a>>,
    mut builder: AggregateBuilder<'a>,
    close: u8,
) -> Result<Type<'a>, ParseError> {
    if cur.peek() == Some(close) {
        cur.bump();
        return builder.end(false).map_err(|e| aggregate_err(e, cur.pos));
    }
    loop {
        let (name_offset, name) = cur.read_ident()?;
        let name = name.to_string();
        cur.expect(b':')?;
        let ty = parse_type(cur, arena, resolver)?;
        builder
            .add_member(&name, ty)
            .map_err(|e| aggregate_err(e, name_offset))?;
        match cur.peek() {
            Some(b',') => {
                cur.bump();
            }
            Some(c) if c == close => {
                cur.bump();
                break;
            }
            Some(_) => return Err(ParseError::UnexpectedChar { offset: cur.pos }),
            None => return Err(ParseError::UnexpectedEof { offset: cur.pos }),
        }
    }
    builder.end(false).map_err(|e| aggregate_err(e, cur.pos))
}

fn aggregate_err(e: dynffi_types::LayoutError, offset: usize) -> ParseError {
    match e {
        dynffi_types::LayoutError::DuplicateField(name) => ParseError::DuplicateField { offset, name },
        dynffi_types::LayoutError::InvalidLayout(name) => ParseError::InvalidLayout { offset, name },
        dynffi_types::LayoutError::CountOverflow => ParseError::CountOverflow { offset },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s1_simple_function() {
        let arena = Arena::create();
        let ty = parse(&arena, "i,i;i", None).unwrap();
        match ty.kind() {
            dynffi_types::TypeKind::Function(sig) => {
                assert_eq!(sig.args.len(), 2);
                assert_eq!(sig.fixed_args, 2);
                assert!(matches!(sig.ret.kind(), dynffi_types::TypeKind::Primitive(PrimitiveKind::S32)));
            }
            _ => panic!("expected function"),
        }
    }

    #[test]
    fn s2_struct_by_value_return() {
        let arena = Arena::create();
        let ty = parse(&arena, "{x:d,y:d};d", None).unwrap();
        match ty.kind() {
            dynffi_types::TypeKind::Function(sig) => {
                assert!(matches!(sig.args[0].kind(), dynffi_types::TypeKind::Struct(_)));
            }
            _ => panic!("expected function"),
        }
    }

    #[test]
    fn s3_fixed_array_arg() {
        let arena = Arena::create();
        let ty = parse(&arena, "[i;4];v", None).unwrap();
        match ty.kind() {
            dynffi_types::TypeKind::Function(sig) => match sig.args[0].kind() {
                dynffi_types::TypeKind::Array { count, .. } => assert_eq!(*count, 4),
                _ => panic!("expected array arg"),
            },
            _ => panic!("expected function"),
        }
    }

    #[test]
    fn bare_type_without_semicolon() {
        let arena = Arena::create();
        let ty = parse(&arena, "*i", None).unwrap();
        assert!(matches!(ty.kind(), dynffi_types::TypeKind::Pointer(Some(_))));
    }

    #[test]
    fn variadic_boundary_marks_fixed_args() {
        let arena = Arena::create();
        let ty = parse(&arena, "p,p;d;i", None).unwrap();
        match ty.kind() {
            dynffi_types::TypeKind::Function(sig) => {
                assert_eq!(sig.fixed_args, 2);
                assert_eq!(sig.args.len(), 3);
                assert!(sig.is_variadic());
            }
            _ => panic!("expected function"),
        }
    }

    #[test]
    fn function_pointer_field() {
        let arena = Arena::create();
        let ty = parse(&arena, "{cb:*(i,i;i)}", None).unwrap();
        match ty.kind() {
            dynffi_types::TypeKind::Struct(agg) => {
                assert!(matches!(agg.members[0].ty.kind(), dynffi_types::TypeKind::Pointer(Some(_))));
            }
            _ => panic!("expected struct"),
        }
    }

    #[test]
    fn unexpected_char_has_valid_offset() {
        let arena = Arena::create();
        let err = parse(&arena, "i,?;i", None).unwrap_err();
        assert_eq!(err.offset(), 2);
    }

    #[test]
    fn unbalanced_delimiter_reported() {
        let arena = Arena::create();
        let err = parse(&arena, "{x:i", None).unwrap_err();
        assert!(matches!(err, ParseError::UnexpectedEof { .. }));
    }

    #[test]
    fn unknown_typedef_without_resolver() {
        let arena = Arena::create();
        let err = parse(&arena, "MyInt;v", None).unwrap_err();
        assert!(matches!(err, ParseError::UnknownTypedef { .. }));
    }

    struct FixedResolver;
    impl<'a> TypedefResolver<'a> for FixedResolver {
        fn resolve(&self, name: &str) -> Option<Type<'a>> {
            if name == "MyInt" {
                Some(primitive(PrimitiveKind::S32))
            } else {
                None
            }
        }
    }

    #[test]
    fn typedef_resolved_by_host() {
        let arena = Arena::create();
        let resolver = FixedResolver;
        let ty = parse(&arena, "MyInt;v", Some(&resolver)).unwrap();
        match ty.kind() {
            dynffi_types::TypeKind::Function(sig) => {
                assert!(matches!(sig.args[0].kind(), dynffi_types::TypeKind::Primitive(PrimitiveKind::S32)));
            }
            _ => panic!("expected function"),
        }
    }

    #[test]
    fn too_many_semicolons_is_an_error() {
        let arena = Arena::create();
        let err = parse(&arena, "i;i;i;i", None).unwrap_err();
        assert!(matches!(err, ParseError::UnexpectedChar { .. }));
    }

    #[test]
    fn round_trip_via_emit() {
        let arena = Arena::create();
        for s in ["i,i;i", "{x:d,y:d};d", "[i;4];v", "*p;p", "p,p;d;i"] {
            let ty = parse(&arena, s, None).unwrap();
            let re = emit(ty);
            let ty2 = parse(&arena, &re, None).unwrap();
            assert_eq!(format!("{:?}", ty), format!("{:?}", ty2));
        }
    }
}
