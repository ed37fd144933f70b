use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{Data, DeriveInput, Fields, Ident, LitStr, Type, parse_macro_input, spanned::Spanned};

/// Derives `entitymap::Entity` for a struct with named fields.
///
/// ```ignore
/// #[derive(Default, Entity)]
/// #[entity(table = "persons")]
/// struct Person {
///     #[id]
///     #[column]
///     id: i64,
///     #[column(name = "first_name")]
///     first: String,
///     nickname_cache: Vec<String>, // not persisted
/// }
/// ```
///
/// Only fields carrying `#[column]` or `#[id]` are mapped. Their types must
/// implement `entitymap::ColumnValue`. Key cardinality is checked when the
/// metadata is resolved, not here.
#[proc_macro_derive(Entity, attributes(entity, column, id))]
pub fn derive_entity(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match expand_entity(input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

struct MappedField {
    ident: Ident,
    ty: Type,
    column: String,
    primary_key: bool,
}

fn expand_entity(input: DeriveInput) -> syn::Result<TokenStream2> {
    let struct_name = input.ident;

    if !input.generics.params.is_empty() {
        return Err(syn::Error::new_spanned(
            input.generics,
            "Entity does not support generic structs",
        ));
    }

    let table = parse_entity_options(&input.attrs)?;

    let data_struct = match input.data {
        Data::Struct(data) => data,
        _ => {
            return Err(syn::Error::new(
                struct_name.span(),
                "Entity can only be derived for structs",
            ));
        }
    };

    let named_fields = match data_struct.fields {
        Fields::Named(fields) => fields,
        _ => {
            return Err(syn::Error::new(
                struct_name.span(),
                "Entity requires named fields",
            ));
        }
    };

    let mut mapped = Vec::<MappedField>::new();
    for field in named_fields.named {
        let ident = field
            .ident
            .clone()
            .ok_or_else(|| syn::Error::new(field.span(), "Entity requires named fields"))?;
        if let Some((column, primary_key)) = parse_column_options(&field.attrs, &ident)? {
            mapped.push(MappedField {
                ident,
                ty: field.ty,
                column,
                primary_key,
            });
        }
    }

    let type_name = struct_name.to_string();
    let table = match table {
        Some(table) => quote!(::core::option::Option::Some(#table)),
        None => quote!(::core::option::Option::None),
    };

    let declarations = mapped.iter().map(|field| {
        let name = field.ident.to_string();
        let column = &field.column;
        let primary_key = field.primary_key;
        let ty = &field.ty;
        quote! {
            ::entitymap::metadata::FieldDeclaration {
                field: #name,
                column: ::core::option::Option::Some(#column),
                primary_key: #primary_key,
                data_type: <#ty as ::entitymap::ColumnValue>::data_type(),
            }
        }
    });

    let getters = mapped.iter().map(|field| {
        let name = field.ident.to_string();
        let ident = &field.ident;
        quote! {
            #name => ::core::result::Result::Ok(::entitymap::ColumnValue::to_value(&self.#ident)),
        }
    });

    let setters = mapped.iter().map(|field| {
        let name = field.ident.to_string();
        let ident = &field.ident;
        let ty = &field.ty;
        quote! {
            #name => {
                self.#ident = <#ty as ::entitymap::ColumnValue>::from_value(value).map_err(|err| {
                    ::entitymap::OrmError::Instantiation {
                        entity: #type_name,
                        message: ::std::format!("field '{}': {}", #name, err),
                    }
                })?;
                ::core::result::Result::Ok(())
            }
        }
    });

    Ok(quote! {
        impl ::entitymap::Entity for #struct_name {
            fn declaration() -> ::entitymap::metadata::EntityDeclaration {
                ::entitymap::metadata::EntityDeclaration {
                    type_name: #type_name,
                    table: #table,
                    fields: ::std::vec![#(#declarations),*],
                }
            }

            fn get_field(&self, field: &str) -> ::entitymap::Result<::entitymap::Value> {
                match field {
                    #(#getters)*
                    other => ::core::result::Result::Err(::entitymap::OrmError::Instantiation {
                        entity: #type_name,
                        message: ::std::format!("no mapped field '{}'", other),
                    }),
                }
            }

            fn set_field(
                &mut self,
                field: &str,
                value: ::entitymap::Value,
            ) -> ::entitymap::Result<()> {
                match field {
                    #(#setters)*
                    other => {
                        let _ = value;
                        ::core::result::Result::Err(::entitymap::OrmError::Instantiation {
                            entity: #type_name,
                            message: ::std::format!("no mapped field '{}'", other),
                        })
                    }
                }
            }
        }
    })
}

fn parse_entity_options(attrs: &[syn::Attribute]) -> syn::Result<Option<String>> {
    let mut table = None;

    for attr in attrs {
        if !attr.path().is_ident("entity") {
            continue;
        }

        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("table") {
                let value = meta.value()?;
                let lit: LitStr = value.parse()?;
                table = Some(lit.value());
                return Ok(());
            }

            Err(meta.error("Unsupported entity attribute. Supported: table = \"...\""))
        })?;
    }

    Ok(table)
}

/// Column name and key flag of a mapped field, `None` for unmapped fields.
fn parse_column_options(
    attrs: &[syn::Attribute],
    ident: &Ident,
) -> syn::Result<Option<(String, bool)>> {
    let mut column: Option<String> = None;
    let mut seen_column = false;
    let mut primary_key = false;

    for attr in attrs {
        if attr.path().is_ident("id") {
            if !matches!(attr.meta, syn::Meta::Path(_)) {
                return Err(syn::Error::new(attr.span(), "#[id] does not take arguments"));
            }
            primary_key = true;
            continue;
        }

        if !attr.path().is_ident("column") {
            continue;
        }

        if seen_column {
            return Err(syn::Error::new(
                attr.span(),
                "Duplicate #[column(...)] attribute on field",
            ));
        }
        seen_column = true;

        match &attr.meta {
            syn::Meta::Path(_) => {}
            syn::Meta::List(list) => {
                list.parse_nested_meta(|meta| {
                    if meta.path.is_ident("name") {
                        let value = meta.value()?;
                        let lit: LitStr = value.parse()?;
                        column = Some(lit.value());
                        return Ok(());
                    }

                    Err(meta.error("Unsupported #[column(...)] option. Supported: name = \"...\""))
                })?;
            }
            syn::Meta::NameValue(_) => {
                return Err(syn::Error::new(
                    attr.span(),
                    "Unsupported #[column = ...] syntax. Use #[column] or #[column(name = \"...\")]",
                ));
            }
        }
    }

    if !seen_column && !primary_key {
        return Ok(None);
    }

    Ok(Some((column.unwrap_or_else(|| ident.to_string()), primary_key)))
}
