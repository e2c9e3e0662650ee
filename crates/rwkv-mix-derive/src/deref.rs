use proc_macro2::TokenStream;
use quote::{quote, ToTokens};
use syn::{spanned::Spanned, Data, DeriveInput, Fields, Index, Type};

/// The accessor and type of the only field of a newtype struct.
struct Inner {
    member: TokenStream,
    ty: Type,
}

fn inner_field(input: &DeriveInput) -> syn::Result<Inner> {
    let Data::Struct(data) = &input.data else {
        return Err(syn::Error::new(input.span(), "expect a struct"));
    };
    let fields = match &data.fields {
        Fields::Named(fields) => &fields.named,
        Fields::Unnamed(fields) => &fields.unnamed,
        Fields::Unit => return Err(syn::Error::new(data.fields.span(), "expect a newtype")),
    };
    let mut iter = fields.iter();
    match (iter.next(), iter.next()) {
        (Some(field), None) => {
            let member = match &field.ident {
                Some(ident) => ident.to_token_stream(),
                None => Index::from(0).to_token_stream(),
            };
            let ty = field.ty.clone();
            Ok(Inner { member, ty })
        }
        _ => Err(syn::Error::new(
            fields.span(),
            "expect a struct with exactly one field",
        )),
    }
}

pub fn expand_derive_deref(input: DeriveInput) -> syn::Result<TokenStream> {
    let Inner { member, ty } = inner_field(&input)?;
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();
    Ok(quote! {
        impl #impl_generics ::std::ops::Deref for #name #ty_generics #where_clause {
            type Target = #ty;

            #[inline]
            fn deref(&self) -> &Self::Target {
                &self.#member
            }
        }
    })
}

pub fn expand_derive_deref_mut(input: DeriveInput) -> syn::Result<TokenStream> {
    let Inner { member, .. } = inner_field(&input)?;
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();
    Ok(quote! {
        impl #impl_generics ::std::ops::DerefMut for #name #ty_generics #where_clause {
            #[inline]
            fn deref_mut(&mut self) -> &mut Self::Target {
                &mut self.#member
            }
        }
    })
}
