//! Procedural macro implementations re-exported by `strata-macros`.

use proc_macro::TokenStream;
use proc_macro2::Span;
use quote::quote;
use syn::{parse_macro_input, AttributeArgs, ItemFn, Lit, Meta, NestedMeta};

/// Level used when `test_traced` is invoked without arguments.
const DEFAULT_LEVEL: &str = "DEBUG";

/// Run a test with a `tracing` subscriber scoped to the test thread.
///
/// The level can be passed positionally (`#[test_traced("TRACE")]`) or by
/// name (`#[test_traced(level = "INFO")]`) and defaults to `DEBUG`.
///
/// # Example
///
/// ```rust,ignore
/// use strata_macros::test_traced;
///
/// #[test_traced("INFO")]
/// fn test_scheduler() {
///     tracing::info!("visible in the test output");
/// }
/// ```
#[proc_macro_attribute]
pub fn test_traced(attr: TokenStream, item: TokenStream) -> TokenStream {
    let args = parse_macro_input!(attr as AttributeArgs);
    let input = parse_macro_input!(item as ItemFn);

    // Parse the requested level
    let mut level = String::from(DEFAULT_LEVEL);
    for arg in args {
        match arg {
            NestedMeta::Lit(Lit::Str(lit)) => level = lit.value(),
            NestedMeta::Meta(Meta::NameValue(pair)) if pair.path.is_ident("level") => {
                match pair.lit {
                    Lit::Str(lit) => level = lit.value(),
                    other => {
                        return syn::Error::new_spanned(other, "level must be a string literal")
                            .to_compile_error()
                            .into()
                    }
                }
            }
            other => {
                return syn::Error::new_spanned(other, "expected a level such as \"TRACE\"")
                    .to_compile_error()
                    .into()
            }
        }
    }
    let level = match level.to_uppercase().as_str() {
        "TRACE" => quote!(::strata_macros::tracing::Level::TRACE),
        "DEBUG" => quote!(::strata_macros::tracing::Level::DEBUG),
        "INFO" => quote!(::strata_macros::tracing::Level::INFO),
        "WARN" => quote!(::strata_macros::tracing::Level::WARN),
        "ERROR" => quote!(::strata_macros::tracing::Level::ERROR),
        other => {
            return syn::Error::new(Span::call_site(), format!("invalid level: {other}"))
                .to_compile_error()
                .into()
        }
    };

    // Wrap the body in a dispatcher that only lives for this test
    let attrs = &input.attrs;
    let vis = &input.vis;
    let sig = &input.sig;
    let block = &input.block;
    let expanded = quote! {
        #[test]
        #(#attrs)*
        #vis #sig {
            let subscriber = ::strata_macros::tracing_subscriber::fmt()
                .with_test_writer()
                .with_max_level(#level)
                .with_line_number(true)
                .with_span_events(::strata_macros::tracing_subscriber::fmt::format::FmtSpan::CLOSE)
                .finish();
            let dispatch = ::strata_macros::tracing::Dispatch::new(subscriber);
            ::strata_macros::tracing::dispatcher::with_default(&dispatch, || #block)
        }
    };
    TokenStream::from(expanded)
}
