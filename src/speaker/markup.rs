//! Parser for the small XML subset used by speaker files: elements,
//! attributes, comments and a prolog. Text content is skipped.

use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{tag, take_till, take_until, take_while1},
    character::complete::{char, multispace0, multispace1},
    combinator::{all_consuming, cut, value},
    error::{ContextError, ParseError, context},
    multi::many0,
    sequence::{delimited, preceded, separated_pair},
};

use super::SpeakerError;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Element {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<Element>,
}

impl Element {
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// First element called `name` in a depth-first walk, including `self`.
    pub fn find(&self, name: &str) -> Option<&Element> {
        if self.name == name {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(name))
    }
}

pub fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

fn unescape(s: &str) -> String {
    if !s.contains('&') {
        return s.to_string();
    }
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

fn name<'a, E: ParseError<&'a str>>(i: &'a str) -> IResult<&'a str, &'a str, E> {
    take_while1(|c: char| c.is_alphanumeric() || matches!(c, '_' | '-' | ':' | '.')).parse(i)
}

fn quoted<'a, E: ParseError<&'a str>>(i: &'a str) -> IResult<&'a str, &'a str, E> {
    alt((
        delimited(char('"'), take_till(|c: char| c == '"'), char('"')),
        delimited(char('\''), take_till(|c: char| c == '\''), char('\'')),
    ))
    .parse(i)
}

fn attribute<'a, E: ParseError<&'a str>>(i: &'a str) -> IResult<&'a str, (String, String), E> {
    let (i, (k, v)) = separated_pair(name, delimited(multispace0, char('='), multispace0), quoted).parse(i)?;
    Ok((i, (k.to_string(), unescape(v))))
}

fn comment<'a, E: ParseError<&'a str>>(i: &'a str) -> IResult<&'a str, (), E> {
    value((), delimited(tag("<!--"), take_until("-->"), tag("-->"))).parse(i)
}

/// Whitespace, comments and processing instructions.
fn misc<'a, E: ParseError<&'a str>>(i: &'a str) -> IResult<&'a str, (), E> {
    value(
        (),
        many0(alt((
            value((), multispace1),
            comment,
            value((), delimited(tag("<?"), take_until("?>"), tag("?>"))),
        ))),
    )
    .parse(i)
}

/// Text content and comments between elements.
fn content<'a, E: ParseError<&'a str>>(i: &'a str) -> IResult<&'a str, (), E> {
    value((), many0(alt((value((), take_while1(|c: char| c != '<')), comment)))).parse(i)
}

pub fn element<'a, E>(i: &'a str) -> IResult<&'a str, Element, E>
where
    E: ParseError<&'a str> + ContextError<&'a str>,
{
    let (i, tag_name) = preceded(char('<'), name).parse(i)?;
    let (i, attributes) = many0(preceded(multispace1, attribute)).parse(i)?;
    let (i, _) = multispace0.parse(i)?;
    let mut node = Element {
        name: tag_name.to_string(),
        attributes,
        children: Vec::new(),
    };
    if let Ok((i, _)) = tag::<_, _, E>("/>").parse(i) {
        return Ok((i, node));
    }

    let (i, _) = context("start tag", cut(char('>'))).parse(i)?;
    let (i, children) = many0(preceded(content, element)).parse(i)?;
    let (i, _) = content.parse(i)?;
    let (i, _) = context(
        "end tag",
        cut(delimited(tag("</"), tag(tag_name), preceded(multispace0, char('>')))),
    )
    .parse(i)?;
    node.children = children;
    Ok((i, node))
}

/// Parse a whole document into its root element.
pub fn parse_document(input: &str) -> Result<Element, SpeakerError> {
    let result: IResult<&str, Element, nom::error::Error<&str>> =
        all_consuming(delimited(misc, element, misc)).parse(input);
    match result {
        Ok((_, root)) => Ok(root),
        Err(nom::Err::Error(e) | nom::Err::Failure(e)) => Err(SpeakerError::Markup {
            offset: input.len() - e.input.len(),
            kind: format!("{:?}", e.code),
        }),
        Err(nom::Err::Incomplete(_)) => Err(SpeakerError::Markup {
            offset: input.len(),
            kind: "incomplete input".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_elements() {
        let doc = r#"<?xml version="1.0"?>
<!-- speaker -->
<speaker>
  <glottis_models>
    <glottis_model type="Two-mass model" selected='1'>
      <param index="0" value="1.5e-3" />
      text is ignored
      <param index="1" value="&quot;x&quot;"/>
    </glottis_model>
  </glottis_models>
</speaker>
"#;
        let root = parse_document(doc).unwrap();
        assert_eq!(root.name, "speaker");
        let model = root.find("glottis_model").unwrap();
        assert_eq!(model.attribute("type"), Some("Two-mass model"));
        assert_eq!(model.attribute("selected"), Some("1"));
        let params: Vec<_> = model.children_named("param").collect();
        assert_eq!(params.len(), 2);
        assert_eq!(params[0].attribute("value"), Some("1.5e-3"));
        assert_eq!(params[1].attribute("value"), Some("\"x\""));
    }

    #[test]
    fn mismatched_tags_fail() {
        let err = parse_document("<a><b></a>").unwrap_err();
        assert!(matches!(err, SpeakerError::Markup { .. }));
        assert!(parse_document("<a>").is_err());
        assert!(parse_document("<a/><b/>").is_err());
    }

    #[test]
    fn escape_round_trip() {
        let s = r#"a<b & "c">'d'"#;
        assert_eq!(unescape(&escape(s)), s);
    }
}
