//! Procedural macros for the partflow engine.
//!
//! # RecordValue Derive Macro
//!
//! Implements `TypedValue` for a record payload struct, binding it to the
//! `ValueType` and the `RecordValue` variant of the same name.
//!
//! ## Usage
//!
//! ```ignore
//! #[derive(Debug, Clone, Serialize, Deserialize, RecordValue)]
//! #[value_type(Job)]
//! pub struct JobRecord {
//!     pub job_type: String,
//!     pub retries: u32,
//! }
//! ```

use proc_macro::TokenStream;
use quote::quote;
use syn::{Attribute, Data, DeriveInput, Ident, parse_macro_input, spanned::Spanned};

/// Derives `TypedValue` for a struct.
///
/// `#[value_type(Variant)]` names both the `ValueType` variant and the
/// `RecordValue` variant that wraps this struct.
#[proc_macro_derive(RecordValue, attributes(value_type))]
pub fn derive_record_value(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    match derive_record_value_impl(input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

fn derive_record_value_impl(input: DeriveInput) -> syn::Result<proc_macro2::TokenStream> {
    let name = &input.ident;

    if !matches!(input.data, Data::Struct(_)) {
        return Err(syn::Error::new(
            input.span(),
            "RecordValue can only be derived for structs",
        ));
    }

    let Some(variant) = get_value_type_attr(&input.attrs)? else {
        return Err(syn::Error::new(
            input.span(),
            format!(
                "`{name}` is missing #[value_type(Variant)]. The variant must exist on both \
                 `ValueType` and `RecordValue`."
            ),
        ));
    };

    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    Ok(quote! {
        impl #impl_generics ::partflow::TypedValue for #name #ty_generics #where_clause {
            const VALUE_TYPE: ::partflow::ValueType = ::partflow::ValueType::#variant;

            fn into_record_value(self) -> ::partflow::RecordValue {
                ::partflow::RecordValue::#variant(self)
            }

            fn from_record_value(value: &::partflow::RecordValue) -> ::core::option::Option<&Self> {
                match value {
                    ::partflow::RecordValue::#variant(inner) => ::core::option::Option::Some(inner),
                    #[allow(unreachable_patterns)]
                    _ => ::core::option::Option::None,
                }
            }
        }
    })
}

/// Extract the variant from `#[value_type(Variant)]`.
fn get_value_type_attr(attrs: &[Attribute]) -> syn::Result<Option<Ident>> {
    for attr in attrs {
        if attr.path().is_ident("value_type") {
            let ident: Ident = attr.parse_args()?;
            return Ok(Some(ident));
        }
    }
    Ok(None)
}
