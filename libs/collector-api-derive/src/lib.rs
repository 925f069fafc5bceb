use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{format_ident, quote};
use syn::{parse_macro_input, Data, DeriveInput, Fields, Ident};

/// Derive macro for per-field entity merging.
///
/// Generates `impl collector_api::merge::Merge` that folds every field of
/// the incoming value into `self` according to its `#[merge(...)]` rule:
///
/// | Attribute            | Rule                                      |
/// |----------------------|-------------------------------------------|
/// | *(none)*, `overwrite`| incoming wins                             |
/// | `coalesce`           | incoming wins when `Some` (`Option` only) |
/// | `max` / `min`        | keep the larger / smaller value           |
/// | `sum`                | saturating add (integer counters)         |
/// | `union`              | extend the collection                     |
/// | `skip`               | keep the existing value                   |
///
/// # Example
///
/// ```ignore
/// #[derive(Merge)]
/// pub struct Heartbeat {
///     pub instance_id: i32,
///     #[merge(max)]
///     pub heartbeat_time: i64,
///     #[merge(sum)]
///     pub beats: u64,
/// }
/// ```
#[proc_macro_derive(Merge, attributes(merge))]
pub fn derive_merge(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match derive_impl(&input) {
        Ok(tokens) => tokens,
        Err(e) => e.to_compile_error().into(),
    }
}

#[derive(Clone, Copy)]
enum Rule {
    Overwrite,
    Coalesce,
    Max,
    Min,
    Sum,
    Union,
    Skip,
}

impl Rule {
    fn parse(ident: &Ident) -> Result<Self, syn::Error> {
        match ident.to_string().as_str() {
            "overwrite" => Ok(Rule::Overwrite),
            "coalesce" => Ok(Rule::Coalesce),
            "max" => Ok(Rule::Max),
            "min" => Ok(Rule::Min),
            "sum" => Ok(Rule::Sum),
            "union" => Ok(Rule::Union),
            "skip" => Ok(Rule::Skip),
            other => Err(syn::Error::new_spanned(
                ident,
                format!(
                    "unknown merge rule '{other}' (expected overwrite, coalesce, max, min, sum, union, skip)"
                ),
            )),
        }
    }

    fn helper(self) -> Option<TokenStream2> {
        match self {
            Rule::Overwrite => Some(quote! { ::collector_api::merge::overwrite }),
            Rule::Coalesce => Some(quote! { ::collector_api::merge::coalesce }),
            Rule::Max => Some(quote! { ::collector_api::merge::max }),
            Rule::Min => Some(quote! { ::collector_api::merge::min }),
            Rule::Sum => Some(quote! { ::collector_api::merge::sum }),
            Rule::Union => Some(quote! { ::collector_api::merge::union }),
            Rule::Skip => None,
        }
    }
}

fn derive_impl(input: &DeriveInput) -> Result<TokenStream, syn::Error> {
    let name = &input.ident;

    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => &fields.named,
            _ => {
                return Err(syn::Error::new_spanned(
                    name,
                    "Merge only supports structs with named fields",
                ))
            }
        },
        _ => return Err(syn::Error::new_spanned(name, "Merge only supports structs")),
    };

    let mut bindings = Vec::new();
    let mut statements = Vec::new();

    for field in fields {
        let field_name = field
            .ident
            .as_ref()
            .ok_or_else(|| syn::Error::new_spanned(field, "expected named field"))?;

        // Parse #[merge(...)] attribute; at most one rule per field.
        let mut rule: Option<Rule> = None;
        for attr in &field.attrs {
            if !attr.path().is_ident("merge") {
                continue;
            }
            attr.parse_nested_meta(|meta| {
                let ident = meta
                    .path
                    .get_ident()
                    .ok_or_else(|| meta.error("expected a merge rule"))?;
                if rule.is_some() {
                    return Err(meta.error("only one merge rule per field"));
                }
                rule = Some(Rule::parse(ident)?);
                Ok(())
            })?;
        }

        let rule = rule.unwrap_or(Rule::Overwrite);
        match rule.helper() {
            Some(helper) => {
                let binding = format_ident!("__incoming_{}", field_name);
                bindings.push(quote! { #field_name: #binding });
                statements.push(quote! { #helper(&mut self.#field_name, #binding); });
            }
            None => bindings.push(quote! { #field_name: _ }),
        }
    }

    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let expanded = quote! {
        impl #impl_generics ::collector_api::merge::Merge for #name #ty_generics #where_clause {
            fn merge(&mut self, __incoming: Self) {
                let Self { #(#bindings),* } = __incoming;
                #(#statements)*
            }
        }
    };

    Ok(TokenStream::from(expanded))
}
