//! Closed registry of template functions
//!
//! A placeholder such as `${replace(a-b, -, _)}` calls a named pure function.
//! Arguments are split on commas, trimmed, and stripped of surrounding quotes.
//! Unknown names or wrong arity leave the placeholder untouched.

type Function = fn(&[&str]) -> Option<String>;

const REGISTRY: &[(&str, Function)] = &[
    ("upper", upper),
    ("lower", lower),
    ("trim", trim),
    ("default", default),
    ("replace", replace),
    ("basename", basename),
];

/// Evaluates `name(args)`, returning `None` when it is not a known call
pub fn call(token: &str) -> Option<String> {
    let (name, args) = parse_call(token)?;
    let (_, function) = REGISTRY.iter().find(|(n, _)| *n == name)?;
    function(&args)
}

fn parse_call(token: &str) -> Option<(&str, Vec<&str>)> {
    let token = token.trim();
    let open = token.find('(')?;
    let inner = token.strip_suffix(')')?.get(open + 1..)?;
    let name = token[..open].trim();

    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return None;
    }

    let args = if inner.trim().is_empty() {
        Vec::new()
    } else {
        inner.split(',').map(unquote).collect()
    };
    Some((name, args))
}

fn unquote(arg: &str) -> &str {
    let arg = arg.trim();
    for quote in ['"', '\''] {
        if let Some(stripped) = arg
            .strip_prefix(quote)
            .and_then(|a| a.strip_suffix(quote))
        {
            return stripped;
        }
    }
    arg
}

fn upper(args: &[&str]) -> Option<String> {
    match args {
        [s] => Some(s.to_uppercase()),
        _ => None,
    }
}

fn lower(args: &[&str]) -> Option<String> {
    match args {
        [s] => Some(s.to_lowercase()),
        _ => None,
    }
}

fn trim(args: &[&str]) -> Option<String> {
    match args {
        [s] => Some(s.trim().to_string()),
        _ => None,
    }
}

fn default(args: &[&str]) -> Option<String> {
    match args {
        [value, fallback] if value.is_empty() => Some(fallback.to_string()),
        [value, _] => Some(value.to_string()),
        _ => None,
    }
}

fn replace(args: &[&str]) -> Option<String> {
    match args {
        [s, from, to] if !from.is_empty() => Some(s.replace(from, to)),
        _ => None,
    }
}

fn basename(args: &[&str]) -> Option<String> {
    match args {
        [path] => path
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .map(str::to_string),
        _ => None,
    }
}
