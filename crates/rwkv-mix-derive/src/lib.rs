use proc_macro::TokenStream;
use syn::{parse_macro_input, DeriveInput};

mod deref;

/// Derives `Deref` for a newtype, targeting its only field.
#[proc_macro_derive(Deref)]
pub fn derive_deref(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    deref::expand_derive_deref(input)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

/// Derives `DerefMut` for a newtype. Requires `Deref` as well.
#[proc_macro_derive(DerefMut)]
pub fn derive_deref_mut(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    deref::expand_derive_deref_mut(input)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}
