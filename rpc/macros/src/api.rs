use convert_case::{Case, Casing};
use proc_macro2::TokenStream;
use proc_macro_error::abort;
use quote::{format_ident, quote};
use syn::parse::{Parse, ParseStream};
use syn::{
    parse_quote, FnArg, GenericArgument, Ident, ItemTrait, LitStr, Pat, PathArguments, ReturnType,
    TraitItem, Type,
};

pub struct Args {
    name: Option<LitStr>,
}

impl Parse for Args {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        if input.is_empty() {
            return Ok(Args { name: None });
        }
        let ident: Ident = input.parse()?;
        if ident != "name" {
            return Err(syn::Error::new(ident.span(), "expected `name = \"...\"`"));
        }
        input.parse::<syn::Token![=]>()?;
        let name: LitStr = input.parse()?;
        Ok(Args { name: Some(name) })
    }
}

enum ParamKind {
    Plain,
    Optional,
    Callback { reply: bool },
}

struct Param {
    ident: Ident,
    ty: Type,
    kind: ParamKind,
}

enum ResultKind {
    Unit,
    Value(Type),
    Api(Type),
}

struct Operation {
    ident: Ident,
    name: String,
    params: Vec<Param>,
    required: usize,
    fallible: bool,
    result: ResultKind,
}

fn path_last(ty: &Type) -> Option<(&Ident, Option<&syn::AngleBracketedGenericArguments>)> {
    if let Type::Path(type_path) = ty {
        if type_path.qself.is_none() {
            if let Some(segment) = type_path.path.segments.last() {
                let arguments = match &segment.arguments {
                    PathArguments::AngleBracketed(arguments) => Some(arguments),
                    _ => None,
                };
                return Some((&segment.ident, arguments));
            }
        }
    }
    None
}

fn generic_types(arguments: &syn::AngleBracketedGenericArguments) -> Vec<&Type> {
    arguments
        .args
        .iter()
        .filter_map(|argument| match argument {
            GenericArgument::Type(ty) => Some(ty),
            _ => None,
        })
        .collect()
}

fn classify_param(ty: &Type) -> ParamKind {
    if let Some((ident, Some(arguments))) = path_last(ty) {
        if ident == "Option" {
            return ParamKind::Optional;
        }
        if ident == "Callback" {
            let reply = generic_types(arguments).len() > 1;
            return ParamKind::Callback { reply };
        }
    }
    ParamKind::Plain
}

fn classify_result(ty: &Type) -> ResultKind {
    if let Type::Tuple(tuple) = ty {
        if tuple.elems.is_empty() {
            return ResultKind::Unit;
        }
    }
    if let Some((ident, Some(arguments))) = path_last(ty) {
        if ident == "Api" {
            if let Some(inner) = generic_types(arguments).first() {
                return ResultKind::Api((*inner).clone());
            }
        }
    }
    ResultKind::Value(ty.clone())
}

fn classify_output(output: &ReturnType) -> (bool, ResultKind) {
    match output {
        ReturnType::Default => (false, ResultKind::Unit),
        ReturnType::Type(_, ty) => {
            if let Some((ident, arguments)) = path_last(ty) {
                if ident == "RpcResult" {
                    let inner = arguments
                        .and_then(|arguments| generic_types(arguments).first().map(|ty| (*ty).clone()));
                    return match inner {
                        Some(inner) => (true, classify_result(&inner)),
                        None => (true, ResultKind::Unit),
                    };
                }
            }
            (false, classify_result(ty))
        }
    }
}

fn collect_operations(item: &ItemTrait) -> Vec<Operation> {
    let mut operations = Vec::new();
    for entry in item.items.iter() {
        let method = match entry {
            TraitItem::Method(method) => method,
            other => abort!(other, "#[api] traits may only contain methods"),
        };
        if method.sig.asyncness.is_some() {
            abort!(
                method.sig.ident,
                "#[api] operations are synchronous; offload blocking work inside the handler"
            );
        }
        match method.sig.receiver() {
            Some(FnArg::Receiver(receiver))
                if receiver.reference.is_some() && receiver.mutability.is_none() => {}
            _ => abort!(method.sig.ident, "#[api] operations must take `&self`"),
        }

        let mut params = Vec::new();
        for input in method.sig.inputs.iter() {
            let pat_type = match input {
                FnArg::Receiver(_) => continue,
                FnArg::Typed(pat_type) => pat_type,
            };
            let ident = match pat_type.pat.as_ref() {
                Pat::Ident(pat) => pat.ident.clone(),
                other => abort!(other, "#[api] parameters must be plain identifiers"),
            };
            let ty = (*pat_type.ty).clone();
            let kind = classify_param(&ty);
            params.push(Param { ident, ty, kind });
        }

        let required = params
            .iter()
            .rposition(|param| !matches!(param.kind, ParamKind::Optional))
            .map(|index| index + 1)
            .unwrap_or(0);

        let (fallible, result) = classify_output(&method.sig.output);

        operations.push(Operation {
            ident: method.sig.ident.clone(),
            name: method.sig.ident.to_string(),
            params,
            required,
            fallible,
            result,
        });
    }
    operations
}

fn thunk_tokens(operation: &Operation) -> TokenStream {
    let name = &operation.name;
    let method = &operation.ident;
    let required = operation.required;
    let total = operation.params.len();

    let arg_lets = operation.params.iter().enumerate().map(|(index, param)| {
        let ident = &param.ident;
        let ty = &param.ty;
        match &param.kind {
            ParamKind::Plain => quote! {
                let #ident: #ty = __scope.typed_arg(&__args, #index)?;
            },
            ParamKind::Optional => quote! {
                let #ident: #ty = __scope.optional_arg(&__args, #index)?;
            },
            ParamKind::Callback { reply } => quote! {
                let #ident: #ty = __scope.callback_arg(&__args, #index, #reply)?;
            },
        }
    });

    let idents = operation.params.iter().map(|param| &param.ident);
    let call = quote! { __owner.#method( #(#idents),* ) };
    let call = if operation.fallible {
        quote! { #call? }
    } else {
        call
    };

    let finish = match &operation.result {
        ResultKind::Unit => quote! {
            #call;
            __scope.unit_result()
        },
        ResultKind::Value(_) => quote! {
            let __value = #call;
            __scope.value_result(__value)
        },
        ResultKind::Api(_) => quote! {
            let __api = #call;
            __scope.api_result(__api)
        },
    };

    quote! {
        {
            let __owner = owner.clone();
            vtable.operation(
                #name,
                #required,
                #total,
                ::std::sync::Arc::new(
                    move |__scope: ::ferrite_rpc::api::CallScope,
                          __args: ::std::vec::Vec<::ferrite_rpc::value::Variant>|
                          -> ::ferrite_rpc::api::OperationFuture {
                        let __owner = __owner.clone();
                        ::std::boxed::Box::pin(async move {
                            __scope.expect_arity(#name, __args.len(), #required, #total)?;
                            #(#arg_lets)*
                            #finish
                        })
                    },
                ),
            );
        }
    }
}

fn proxy_signature(operation: &Operation) -> TokenStream {
    let method = &operation.ident;
    let params = operation.params.iter().map(|param| {
        let ident = &param.ident;
        let ty = &param.ty;
        quote! { #ident: #ty }
    });
    let output = match &operation.result {
        ResultKind::Unit => quote! { () },
        ResultKind::Value(ty) => quote! { #ty },
        ResultKind::Api(inner) => quote! { ::ferrite_rpc::api::Api<#inner> },
    };
    quote! {
        async fn #method(&self #(, #params)*) -> ::ferrite_rpc::result::RpcResult<#output>
    }
}

fn proxy_body(operation: &Operation, op_index: usize) -> TokenStream {
    let method = &operation.ident;
    let idents: Vec<&Ident> = operation.params.iter().map(|param| &param.ident).collect();

    let local_call = quote! { __owner.#method( #(#idents),* ) };
    let local_arm = if operation.fallible {
        local_call
    } else {
        match &operation.result {
            ResultKind::Unit => quote! {
                {
                    #local_call;
                    ::core::result::Result::Ok(())
                }
            },
            _ => quote! { ::core::result::Result::Ok(#local_call) },
        }
    };

    let marshal = operation.params.iter().map(|param| {
        let ident = &param.ident;
        match &param.kind {
            ParamKind::Callback { reply } => quote! {
                __args.push(__remote.marshal_callback(#ident, #reply)?);
            },
            _ => quote! {
                __args.push(__remote.marshal(&#ident)?);
            },
        }
    });

    let required = operation.required;
    let total = operation.params.len();
    let elidable: Vec<&Param> = operation
        .params
        .iter()
        .skip(required)
        .filter(|param| matches!(param.kind, ParamKind::Optional))
        .collect();
    let trim = if elidable.is_empty() {
        quote! {}
    } else {
        let checks = operation
            .params
            .iter()
            .enumerate()
            .skip(required)
            .filter(|(_, param)| matches!(param.kind, ParamKind::Optional))
            .map(|(index, param)| {
                let ident = &param.ident;
                let keep = index + 1;
                quote! {
                    if #ident.is_some() {
                        __keep = #keep;
                    }
                }
            });
        quote! {
            let mut __keep = #required;
            #(#checks)*
            __args.truncate(__keep);
        }
    };

    let marshal_stmts = quote! {
        let mut __args: ::std::vec::Vec<::ferrite_rpc::value::Variant> =
            ::std::vec::Vec::with_capacity(#total);
        #(#marshal)*
        #trim
    };

    let unmarshal = match &operation.result {
        ResultKind::Api(inner) => quote! { __remote.remote_api::<#inner>(__value) },
        _ => quote! { __remote.unmarshal(__value) },
    };

    quote! {
        {
            match self.target() {
                ::ferrite_rpc::api::ApiTarget::Local(__owner) => #local_arm,
                ::ferrite_rpc::api::ApiTarget::Remote(__remote) => {
                    #marshal_stmts
                    let __value = __remote.call(#op_index, __args).await?;
                    #unmarshal
                }
            }
        }
    }
}

pub fn expand(args: Args, item: ItemTrait) -> TokenStream {
    if !item.generics.params.is_empty() {
        abort!(item.generics, "#[api] traits cannot be generic");
    }

    let operations = collect_operations(&item);
    if operations.is_empty() {
        abort!(item.ident, "#[api] traits must declare at least one operation");
    }

    let mut item = item;
    item.supertraits.push(parse_quote!(::core::marker::Send));
    item.supertraits.push(parse_quote!(::core::marker::Sync));

    let vis = &item.vis;
    let trait_ident = &item.ident;
    let dyn_ty = quote! { dyn #trait_ident };
    let ext_trait_ident = format_ident!("{}Api", trait_ident);

    let api_name = args
        .name
        .map(|name| name.value())
        .unwrap_or_else(|| trait_ident.to_string().to_case(Case::Snake));

    let decl_entries = operations.iter().map(|operation| {
        let name = &operation.name;
        let required = operation.required;
        let total = operation.params.len();
        quote! {
            ::ferrite_rpc::api::OperationDecl {
                name: #name,
                required: #required,
                total: #total,
            }
        }
    });

    let thunks = operations.iter().map(thunk_tokens);

    let proxy_methods = operations.iter().enumerate().map(|(op_index, operation)| {
        let signature = proxy_signature(operation);
        let body = proxy_body(operation, op_index);
        quote! {
            #signature {
                #body
            }
        }
    });

    let proxy_declarations = operations.iter().map(|operation| {
        let signature = proxy_signature(operation);
        quote! { #signature; }
    });

    quote! {
        #item

        impl ::ferrite_rpc::api::ApiInterface for #dyn_ty {
            const NAME: &'static str = #api_name;

            fn operations() -> &'static [::ferrite_rpc::api::OperationDecl] {
                const OPERATIONS: &[::ferrite_rpc::api::OperationDecl] = &[ #(#decl_entries),* ];
                OPERATIONS
            }

            fn vtable(owner: ::std::sync::Arc<Self>) -> ::ferrite_rpc::api::Vtable {
                let mut vtable = ::ferrite_rpc::api::Vtable::new();
                #(#thunks)*
                vtable
            }
        }

        #[::ferrite_rpc::async_trait]
        #vis trait #ext_trait_ident: ::core::marker::Send + ::core::marker::Sync {
            #(#proxy_declarations)*
        }

        #[::ferrite_rpc::async_trait]
        impl #ext_trait_ident for ::ferrite_rpc::api::Api<#dyn_ty> {
            #(#proxy_methods)*
        }
    }
}
