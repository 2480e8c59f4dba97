//! # calltrace macros
//!
//! Provides the `#[traced]` attribute, which records every call of the
//! annotated function on calltrace's global tracer.

use proc_macro::TokenStream;
use quote::quote;
use syn::{FnArg, ItemFn, parse_macro_input, parse_quote};

/// Parse the optional crate path argument, defaulting to `::calltrace`.
fn parse_crate_path(attr: TokenStream) -> syn::Result<syn::Path> {
    if attr.is_empty() {
        Ok(parse_quote!(::calltrace))
    } else {
        syn::parse(attr)
    }
}

/// Declared parameters, not counting a `self` receiver.
fn param_count(sig: &syn::Signature) -> usize {
    sig.inputs
        .iter()
        .filter(|arg| matches!(arg, FnArg::Typed(_)))
        .count()
}

/// Tokens opening the call scope that wraps the function body.
fn scope_tokens(crate_path: &syn::Path, sig: &syn::Signature) -> proc_macro2::TokenStream {
    let name = sig.ident.to_string();
    let params = param_count(sig);
    quote! {
        let __calltrace_scope = #crate_path::global().scope_at(#crate_path::CallSite {
            name: #name,
            module: ::core::module_path!(),
            param_count: #params,
        });
    }
}

fn reject_unsupported(sig: &syn::Signature) -> syn::Result<()> {
    if let Some(asyncness) = &sig.asyncness {
        return Err(syn::Error::new_spanned(
            asyncness,
            "#[traced] cannot be used on async functions: a call must end on the thread that began it",
        ));
    }
    if let Some(constness) = &sig.constness {
        return Err(syn::Error::new_spanned(
            constness,
            "#[traced] cannot be used on const functions",
        ));
    }
    Ok(())
}

/// Record each call of a function on the global tracer.
///
/// The body runs inside a [`CallScope`] that is opened with the function's
/// name, its module path and its parameter count, and closed when the body
/// returns or unwinds. No stack walk is involved.
///
/// ```ignore
/// use calltrace::traced;
///
/// #[traced]
/// fn resize(width: u32, height: u32) {
///     // ...
/// }
/// ```
///
/// Inside calltrace itself, or when the crate is renamed, pass its path:
/// `#[traced(crate)]`, `#[traced(my_tracer)]`.
///
/// [`CallScope`]: https://docs.rs/calltrace/latest/calltrace/struct.CallScope.html
#[proc_macro_attribute]
pub fn traced(attr: TokenStream, item: TokenStream) -> TokenStream {
    let crate_path = match parse_crate_path(attr) {
        Ok(path) => path,
        Err(err) => return err.to_compile_error().into(),
    };
    let mut func = parse_macro_input!(item as ItemFn);
    if let Err(err) = reject_unsupported(&func.sig) {
        return err.to_compile_error().into();
    }

    let scope = scope_tokens(&crate_path, &func.sig);
    let body = &func.block;
    let wrapped: syn::Block = parse_quote!({
        #scope
        #body
    });
    func.block = Box::new(wrapped);

    quote!(#func).into()
}
