//! Identifier extraction, one implementation per source language.
//!
//! An identifier is attackable when the program declares it: a variable,
//! parameter, field or function name introduced by a type. Library names
//! that are only used (e.g. `printf`, `System`) are never renamed.

use super::lexer::{Token, TokenKind};
use super::{Language, Program};

/// Capability interface selected once per run from the configured language
pub trait IdentifierExtractor {
    fn language(&self) -> Language;

    /// True for language keywords and reserved names that must never be renamed
    fn is_reserved(&self, name: &str) -> bool;

    /// Declared identifiers in first-declaration order, deduplicated
    fn extract(&self, program: &Program) -> Vec<String>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// KEYWORD TABLES
// ═══════════════════════════════════════════════════════════════════════════════

const C_KEYWORDS: &[&str] = &[
    "auto", "break", "case", "const", "continue", "default", "do", "else", "enum", "extern",
    "for", "goto", "if", "inline", "register", "restrict", "return", "sizeof", "static",
    "struct", "switch", "typedef", "union", "volatile", "while", "NULL", "true", "false",
];

const C_TYPES: &[&str] = &[
    "char", "double", "float", "int", "long", "short", "signed", "unsigned", "void", "_Bool",
    "bool",
];

const CPP_KEYWORDS: &[&str] = &[
    "class", "namespace", "template", "typename", "public", "private", "protected", "virtual",
    "new", "delete", "this", "using", "operator", "friend", "try", "catch", "throw", "nullptr",
    "const_cast", "static_cast", "dynamic_cast", "reinterpret_cast", "explicit", "mutable",
    "override", "final", "noexcept", "constexpr",
];

const CPP_TYPES: &[&str] = &["wchar_t", "char16_t", "char32_t"];

const CPP_RESERVED: &[&str] = &[
    "std", "string", "vector", "map", "set", "pair", "cout", "cin", "endl", "size_t",
];

const JAVA_KEYWORDS: &[&str] = &[
    "abstract", "assert", "break", "case", "catch", "class", "const", "continue", "default",
    "do", "else", "enum", "extends", "final", "finally", "for", "goto", "if", "implements",
    "import", "instanceof", "interface", "native", "new", "package", "private", "protected",
    "public", "return", "static", "strictfp", "super", "switch", "synchronized", "this",
    "throw", "throws", "transient", "try", "volatile", "while", "true", "false", "null",
];

const JAVA_TYPES: &[&str] = &[
    "boolean", "byte", "char", "double", "float", "int", "long", "short", "void", "var",
];

const JAVA_RESERVED: &[&str] = &["String", "System", "Object", "length"];

// ═══════════════════════════════════════════════════════════════════════════════
// C-FAMILY EXTRACTOR
// ═══════════════════════════════════════════════════════════════════════════════

/// Declaration-based extractor shared by C, C++ and Java
#[derive(Debug, Clone)]
pub struct CFamilyExtractor {
    language: Language,
    keywords: Vec<&'static str>,
    types: Vec<&'static str>,
    reserved: Vec<&'static str>,
}

impl CFamilyExtractor {
    pub fn new(language: Language) -> Self {
        let (keywords, types, reserved): (Vec<_>, Vec<_>, Vec<_>) = match language {
            Language::C => (C_KEYWORDS.to_vec(), C_TYPES.to_vec(), vec![]),
            Language::Cpp => (
                [C_KEYWORDS, CPP_KEYWORDS].concat(),
                [C_TYPES, CPP_TYPES].concat(),
                CPP_RESERVED.to_vec(),
            ),
            Language::Java => (
                JAVA_KEYWORDS.to_vec(),
                JAVA_TYPES.to_vec(),
                JAVA_RESERVED.to_vec(),
            ),
        };
        Self {
            language,
            keywords,
            types,
            reserved,
        }
    }

    fn is_keyword(&self, name: &str) -> bool {
        self.keywords.contains(&name) || self.types.contains(&name)
    }

    fn is_type_keyword(&self, name: &str) -> bool {
        self.types.contains(&name)
    }

    /// `prev` is the index of the token right before the candidate name
    /// (pointer/reference markers already skipped).
    fn follows_type(&self, words: &[&Token], prev: usize, name: usize, pointer: bool) -> bool {
        let t = words[prev];
        match t.kind {
            TokenKind::Ident if self.is_type_keyword(&t.text) => true,
            TokenKind::Ident if self.is_keyword(&t.text) => false,
            TokenKind::Ident => {
                // `Foo x` is a declaration; `Foo * x` only at statement start
                !pointer || (self.at_statement_start(words, prev) && ends_declarator(words, name))
            }
            TokenKind::Punct if t.text == "]" => prev > 0 && words[prev - 1].is_punct("["),
            TokenKind::Punct if t.text == ">" => generic_close(words, prev),
            _ => false,
        }
    }

    fn at_statement_start(&self, words: &[&Token], i: usize) -> bool {
        if i == 0 {
            return true;
        }
        let t = words[i - 1];
        match t.kind {
            TokenKind::Punct => matches!(t.text.as_str(), ";" | "{" | "}" | "(" | ","),
            TokenKind::Ident => QUALIFIERS.contains(&t.text.as_str()),
            _ => false,
        }
    }
}

/// Keywords that may precede a user type name in a declaration
const QUALIFIERS: &[&str] = &[
    "struct", "union", "enum", "class", "const", "static", "volatile", "extern", "register",
    "final",
];

fn ends_declarator(words: &[&Token], name: usize) -> bool {
    match words.get(name + 1) {
        Some(t) => t.kind == TokenKind::Punct && matches!(t.text.as_str(), "=" | ";" | "," | ")" | "["),
        None => false,
    }
}

/// True when the `>` at `close` ends a generic argument list like `List<T>`
fn generic_close(words: &[&Token], close: usize) -> bool {
    if close > 0 && words[close - 1].is_punct("-") {
        return false;
    }
    let mut depth = 0usize;
    let mut i = close;
    loop {
        let t = words[i];
        if t.kind == TokenKind::Punct {
            match t.text.as_str() {
                ">" => depth += 1,
                "<" => {
                    depth -= 1;
                    if depth == 0 {
                        return i > 0 && words[i - 1].kind == TokenKind::Ident;
                    }
                }
                ";" | "{" | "}" | "(" | ")" | "=" => return false,
                _ => {}
            }
        }
        if i == 0 {
            return false;
        }
        i -= 1;
    }
}

impl IdentifierExtractor for CFamilyExtractor {
    fn language(&self) -> Language {
        self.language
    }

    fn is_reserved(&self, name: &str) -> bool {
        name == "main" || self.is_keyword(name) || self.reserved.contains(&name)
    }

    fn extract(&self, program: &Program) -> Vec<String> {
        let words: Vec<&Token> = program
            .tokens()
            .iter()
            .filter(|t| !t.kind.is_trivia())
            .collect();

        let mut found: Vec<String> = Vec::new();
        let mut depth = 0usize;
        let mut decl_depth: Option<usize> = None;

        for i in 0..words.len() {
            let t = words[i];
            if t.kind == TokenKind::Punct {
                match t.text.as_str() {
                    "(" | "[" => depth += 1,
                    ")" | "]" => {
                        depth = depth.saturating_sub(1);
                        if decl_depth.map_or(false, |d| d > depth) {
                            decl_depth = None;
                        }
                    }
                    ";" | "{" | "}" => decl_depth = None,
                    _ => {}
                }
                continue;
            }
            if t.kind != TokenKind::Ident || self.is_reserved(&t.text) {
                continue;
            }

            // Skip pointer/reference markers between the type and the name
            let mut prev = i;
            let mut pointer = false;
            while prev > 0 && (words[prev - 1].is_punct("*") || words[prev - 1].is_punct("&")) {
                prev -= 1;
                pointer = true;
            }
            if prev == 0 {
                continue;
            }
            prev -= 1;

            let declared = if self.follows_type(&words, prev, i, pointer) {
                true
            } else {
                // `int a, b;` continues the previous declarator list
                words[prev].is_punct(",") && decl_depth == Some(depth) && ends_declarator(&words, i)
            };

            if declared {
                decl_depth = Some(depth);
                if !found.iter().any(|n| n == &t.text) {
                    found.push(t.text.clone());
                }
            }
        }
        found
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    fn extract(lang: Language, src: &str) -> Vec<String> {
        lang.extractor().extract(&Program::parse(src))
    }

    #[test]
    fn test_extract_parameters_and_function() {
        let ids = extract(Language::C, "int foo(int a,int b){return a+b;}");
        assert_eq!(ids, vec!["foo", "a", "b"]);
    }

    #[test]
    fn test_main_and_library_calls_excluded() {
        let ids = extract(
            Language::C,
            "int main() { int n = 3; printf(\"%d\", n); return 0; }",
        );
        assert_eq!(ids, vec!["n"]);
    }

    #[test]
    fn test_pointers_and_comma_lists() {
        let ids = extract(
            Language::C,
            "void f(char *s) { int i, j = 0; size_t len; len = i * j; }",
        );
        assert_eq!(ids, vec!["f", "s", "i", "j", "len"]);
    }

    #[test]
    fn test_user_type_pointer_at_statement_start() {
        let ids = extract(Language::C, "void g() { Node *head = 0; x = a * b; }");
        assert_eq!(ids, vec!["g", "head"]);
    }

    #[test]
    fn test_java_arrays_and_generics() {
        let ids = extract(
            Language::Java,
            "public static void main(String[] args) { List<String> items = new ArrayList<>(); int[] xs = {}; }",
        );
        assert_eq!(ids, vec!["args", "items", "xs"]);
    }

    #[test]
    fn test_arrow_is_not_generic() {
        let ids = extract(Language::C, "void h(struct S *p) { if (a < b) p->x = 1; }");
        assert_eq!(ids, vec!["h", "p"]);
    }

    #[test]
    fn test_cpp_reserved_names() {
        let ids = extract(Language::Cpp, "int main() { std::string name; int count = 0; }");
        assert_eq!(ids, vec!["name", "count"]);
    }
}
