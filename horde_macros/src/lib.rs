//! Attribute macros for horde.
//!
//! `#[metric]` and `#[aggregate]` add the derives every metric and aggregate needs
//! (serde, comparison, `Debug`, `Clone`). `#[metric]` also implements the `Metric`
//! marker trait, which must be in scope at the call site.
use proc_macro::TokenStream;
use quote::quote;
use syn::{ItemStruct, parse_macro_input};

extern crate proc_macro;

fn with_common_derives(ast: &ItemStruct) -> proc_macro2::TokenStream {
    quote! {
        #[derive(
            serde::Serialize,
            serde::Deserialize,
            std::cmp::PartialOrd,
            std::cmp::PartialEq,
            std::fmt::Debug,
            std::clone::Clone
        )]
        #ast
    }
}

#[proc_macro_attribute]
pub fn metric(_attr: TokenStream, item: TokenStream) -> TokenStream {
    let ast = parse_macro_input!(item as ItemStruct);
    let ident = &ast.ident;
    let (impl_generics, ty_generics, where_clause) = ast.generics.split_for_impl();
    let derived = with_common_derives(&ast);

    let expanded = quote! {
        #derived

        impl #impl_generics Metric for #ident #ty_generics #where_clause {}
    };

    TokenStream::from(expanded)
}

#[proc_macro_attribute]
pub fn aggregate(_attr: TokenStream, item: TokenStream) -> TokenStream {
    let ast = parse_macro_input!(item as ItemStruct);
    TokenStream::from(with_common_derives(&ast))
}
